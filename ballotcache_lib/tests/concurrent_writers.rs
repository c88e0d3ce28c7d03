//! Several connections on one WAL file writing the same keys at once, the
//! way separate resolver processes share a store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

use ballotcache_lib::{BallotEntryFields, BallotLocationFields, BallotSubject, Db, LocationKey};
use tempfile::tempdir;

const WRITERS: usize = 8;
const ROUNDS: i64 = 25;

fn init_store(path: &Path) {
    let db = Db::open(path).expect("open db");
    db.init().expect("init schema");
}

/// Runs `write` on `WRITERS` threads, each with its own connection, all
/// released together for every round. Returns every error message seen.
fn race<F>(path: PathBuf, write: F) -> Vec<String>
where
    F: Fn(&Db, i64) -> Result<(), String> + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(WRITERS));
    let write = Arc::new(write);
    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let write = Arc::clone(&write);
            let path = path.clone();
            thread::spawn(move || {
                let db = Db::open(&path).expect("open db");
                let mut errors = Vec::new();
                for round in 0..ROUNDS {
                    barrier.wait();
                    if let Err(e) = write(&db, round) {
                        errors.push(e);
                    }
                }
                errors
            })
        })
        .collect();

    handles
        .into_iter()
        .flat_map(|h| h.join().expect("writer thread panicked"))
        .collect()
}

fn count(db: &Db, sql: &str) -> i64 {
    db.conn().query_row(sql, [], |r| r.get(0)).unwrap()
}

#[test]
fn concurrent_location_writers_converge_to_one_row_per_key() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ballots.db");
    init_store(&path);

    let errors = race(path.clone(), |db, round| {
        let fields = BallotLocationFields {
            text_for_map_search: Some("123 Main St, Jackson, MS".into()),
            ..Default::default()
        };
        db.get_or_create_ballot_location(&LocationKey::Voter(1000 + round), 1, &fields)
            .map(|_| ())
            .map_err(|e| e.to_string())
    });
    assert!(errors.is_empty(), "writers failed: {:?}", errors);

    let db = Db::open(&path).unwrap();
    assert_eq!(count(&db, "SELECT COUNT(*) FROM ballot_locations"), ROUNDS);
    assert_eq!(
        count(
            &db,
            "SELECT COUNT(*) FROM (SELECT voter_id FROM ballot_locations
             GROUP BY voter_id, election_id HAVING COUNT(*) > 1)"
        ),
        0
    );
    assert_eq!(
        count(&db, "SELECT COUNT(DISTINCT we_vote_id) FROM ballot_locations"),
        ROUNDS
    );
}

#[test]
fn concurrent_item_writers_converge_to_one_row_per_triple() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ballots.db");
    init_store(&path);

    let errors = race(path.clone(), |db, round| {
        let key = LocationKey::MapPoint(format!("wv01ploc{}", round));
        let fields = BallotEntryFields {
            display_name: Some("Governor".into()),
            google_ballot_placement: Some(1),
            ..Default::default()
        };
        db.upsert_ballot_item(&key, 1, &BallotSubject::Office("wv01off1".into()), &fields)
            .and_then(|_| {
                db.upsert_ballot_item(
                    &key,
                    1,
                    &BallotSubject::Measure("wv01meas1".into()),
                    &BallotEntryFields {
                        display_name: Some("Initiative 65".into()),
                        ..Default::default()
                    },
                )
            })
            .map(|_| ())
            .map_err(|e| e.to_string())
    });
    assert!(errors.is_empty(), "writers failed: {:?}", errors);

    let db = Db::open(&path).unwrap();
    assert_eq!(count(&db, "SELECT COUNT(*) FROM ballot_items"), ROUNDS * 2);
    for round in 0..ROUNDS {
        let key = LocationKey::MapPoint(format!("wv01ploc{}", round));
        assert_eq!(db.count_ballot_items(&key, 1).unwrap(), 2);
    }
}

#[test]
fn concurrent_copies_to_one_voter_leave_a_single_set() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ballots.db");
    init_store(&path);
    {
        let db = Db::open(&path).unwrap();
        let source = LocationKey::MapPoint("wv01ploc1".into());
        for (n, office) in ["wv01off1", "wv01off2", "wv01off3"].iter().enumerate() {
            db.upsert_ballot_item(
                &source,
                1,
                &BallotSubject::Office(office.to_string()),
                &BallotEntryFields {
                    display_name: Some(format!("Office {}", n)),
                    ..Default::default()
                },
            )
            .unwrap();
        }
    }

    let errors = race(path.clone(), |db, round| {
        db.copy_ballot_items(
            &LocationKey::MapPoint("wv01ploc1".into()),
            &LocationKey::Voter(500 + round % 3),
            1,
        )
        .map(|_| ())
        .map_err(|e| e.to_string())
    });
    assert!(errors.is_empty(), "writers failed: {:?}", errors);

    let db = Db::open(&path).unwrap();
    for voter in 500..503 {
        assert_eq!(db.count_ballot_items(&LocationKey::Voter(voter), 1).unwrap(), 3);
    }
}
