//! Headers database scenarios: reorg to a heavier branch, locator shape,
//! file persistence and corruption handling.

use dogecoin_spv::block::BlockHeader;
use dogecoin_spv::error::{ConsensusError, Error};
use dogecoin_spv::headersdb::{ConnectOutcome, HeadersDb};
use dogecoin_spv::serialize::Reader;
use dogecoin_spv::{Hash256, Uint256, REGTEST};

/// Mine a regtest header on `parent`; `salt` keeps sibling branches
/// distinct.
fn mine(parent: Hash256, salt: u32) -> Vec<u8> {
    let mut merkle_root = [0u8; 32];
    merkle_root[..4].copy_from_slice(&salt.to_le_bytes());
    let mut header = BlockHeader {
        version: 2,
        prev_block: parent,
        merkle_root,
        timestamp: 1_600_000_000 + salt,
        bits: REGTEST.pow_limit_bits,
        nonce: 0,
    };
    let target = REGTEST.pow_limit();
    while Uint256::from_le_bytes(&header.pow_hash()) > target {
        header.nonce += 1;
    }
    header.to_bytes().to_vec()
}

fn connect(db: &mut HeadersDb, bytes: &[u8]) -> Hash256 {
    let mut r = Reader::new(bytes);
    match db.connect_header(&mut r, false).unwrap() {
        ConnectOutcome::Connected { index, .. } => index.hash,
        ConnectOutcome::AlreadyKnown(index) => index.hash,
    }
}

/// Extend `parent` by `n` mined headers, returning every hash on the way.
fn extend(db: &mut HeadersDb, mut parent: Hash256, n: u32, salt_base: u32) -> Vec<Hash256> {
    let mut hashes = Vec::new();
    for i in 0..n {
        let bytes = mine(parent, salt_base + i);
        parent = connect(db, &bytes);
        hashes.push(parent);
    }
    hashes
}

#[test]
fn longer_sibling_branch_wins_and_unwinds() {
    let mut db = HeadersDb::new(&REGTEST);
    let genesis = db.chaintip().hash;

    // shared prefix of 5, then branch A to length 10
    let shared = extend(&mut db, genesis, 5, 0);
    let fork_point = *shared.last().unwrap();
    let branch_a = extend(&mut db, fork_point, 5, 100);
    assert_eq!(db.chaintip().hash, *branch_a.last().unwrap());
    assert_eq!(db.chaintip().height, 10);

    // branch B grows from the same fork point to length 11
    let branch_b = extend(&mut db, fork_point, 6, 200);
    assert_eq!(
        db.chaintip().hash,
        *branch_b.last().unwrap(),
        "heavier branch must take the tip"
    );
    assert_eq!(db.chaintip().height, 11);

    // six disconnects rewind to the common ancestor
    for _ in 0..6 {
        assert!(db.disconnect_tip().unwrap());
    }
    assert_eq!(db.chaintip().hash, fork_point);
    assert_eq!(db.chaintip().height, 5);
}

#[test]
fn equal_work_keeps_incumbent_tip() {
    let mut db = HeadersDb::new(&REGTEST);
    let genesis = db.chaintip().hash;
    let a = extend(&mut db, genesis, 3, 0);
    let incumbent = *a.last().unwrap();

    // a same-length sibling never displaces the current tip
    extend(&mut db, a[1], 1, 500);
    assert_eq!(db.chaintip().hash, incumbent);
}

#[test]
fn locator_is_sparse_and_anchored() {
    let mut db = HeadersDb::new(&REGTEST);
    let genesis = db.chaintip().hash;
    let hashes = extend(&mut db, genesis, 30, 0);

    let locator = db.fill_block_locator();
    assert_eq!(locator[0], *hashes.last().unwrap());
    assert_eq!(*locator.last().unwrap(), genesis);
    // first ten step back one by one
    for i in 0..10 {
        assert_eq!(locator[i], hashes[29 - i]);
    }
    assert!(locator.len() < 20, "doubling stride keeps it short");
}

#[test]
fn persistence_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("regtest_headers.db");

    let tip_hash;
    {
        let mut db = HeadersDb::new(&REGTEST);
        db.load(&path)?;
        let genesis = db.chaintip().hash;
        let hashes = extend(&mut db, genesis, 8, 0);
        tip_hash = *hashes.last().unwrap();
        assert_eq!(db.chaintip().height, 8);
    }

    let mut reloaded = HeadersDb::new(&REGTEST);
    let count = reloaded.load(&path)?;
    assert_eq!(count, 8);
    assert_eq!(reloaded.chaintip().height, 8);
    assert_eq!(reloaded.chaintip().hash, tip_hash);

    // disconnect truncates; a reload sees one record less
    assert!(reloaded.disconnect_tip()?);
    let mut again = HeadersDb::new(&REGTEST);
    assert_eq!(again.load(&path)?, 7);
    assert_eq!(again.chaintip().height, 7);
    Ok(())
}

#[test]
fn corrupted_file_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("headers.db");
    {
        let mut db = HeadersDb::new(&REGTEST);
        db.load(&path)?;
        let genesis = db.chaintip().hash;
        extend(&mut db, genesis, 2, 0);
    }

    // flip a byte inside the first record's header
    let mut raw = std::fs::read(&path)?;
    raw[12 + 40] ^= 0xff;
    std::fs::write(&path, &raw)?;

    let mut db = HeadersDb::new(&REGTEST);
    match db.load(&path) {
        Err(Error::Consensus(ConsensusError::CorruptDatabase)) => {}
        other => panic!("expected CorruptDatabase, got {other:?}"),
    }
    Ok(())
}

#[test]
fn wrong_chain_file_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("headers.db");
    {
        let mut db = HeadersDb::new(&dogecoin_spv::MAINNET);
        db.load(&path)?;
    }
    let mut db = HeadersDb::new(&REGTEST);
    assert!(matches!(
        db.load(&path),
        Err(Error::Consensus(ConsensusError::CorruptDatabase))
    ));
    Ok(())
}
