//! Batch assembly against an on-disk catalog.

use crawlaudit::checkable::{Checkable, COLUMNS, TABLE};
use crawlaudit::{get_list_at, AuditConfig};
use crawlaudit_db::DbConnection;
use std::fs;
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

fn open_catalog(dir: &TempDir) -> DbConnection {
    let conn = DbConnection::open(&dir.path().join("catalog.sqlite3")).unwrap();
    conn.make_table(TABLE, COLUMNS).unwrap();
    conn
}

fn add(conn: &DbConnection, path: &str, last_check: i64) {
    conn.execute(
        "INSERT INTO checkables (path, type, last_check) VALUES (?, 'f', ?)",
        &[path.into(), last_check.into()],
    )
    .unwrap();
}

/// 12 never-checked entries and 10 checked 1-5 days (less an hour) ago.
fn seed_scenario(conn: &DbConnection) {
    for i in 0..12 {
        add(conn, &format!("/zero/{:02}", i), 0);
    }
    for days in 1..=5 {
        for copy in 0..2 {
            add(
                conn,
                &format!("/aged/{}-{}", days, copy),
                NOW - (days * DAY - 3_600),
            );
        }
    }
}

fn scenario_config() -> AuditConfig {
    AuditConfig {
        recheck_fraction: 0.3,
        recheck_age: "4d".to_string(),
        batch_size: 10,
        ..AuditConfig::default()
    }
}

fn refresh(conn: &DbConnection, batch: &mut [Checkable]) {
    for entry in batch {
        entry.last_check = NOW;
        entry.persist(conn, false).unwrap();
    }
}

#[test]
fn test_recheck_scenario_drains_stale_pool() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    seed_scenario(&conn);
    let config = scenario_config();

    let mut first = get_list_at(&conn, &config, NOW, Some(10), &[]).unwrap();
    assert_eq!(first.len(), 10);
    let paths: Vec<&str> = first.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(&paths[..2], &["/aged/5-0", "/aged/5-1"]);
    let expected_zero: Vec<String> = (0..8).map(|i| format!("/zero/{:02}", i)).collect();
    assert_eq!(&paths[2..], expected_zero.iter().map(String::as_str).collect::<Vec<_>>().as_slice());

    refresh(&conn, &mut first);

    let second = get_list_at(&conn, &config, NOW, Some(10), &[]).unwrap();
    assert_eq!(second.len(), 10);
    let zero: Vec<&str> = second[..4].iter().map(|e| e.path.as_str()).collect();
    assert_eq!(zero, vec!["/zero/08", "/zero/09", "/zero/10", "/zero/11"]);
    assert!(second[..4].iter().all(|e| e.last_check == 0));

    let oldest = &second[4..];
    assert!(oldest.iter().all(|e| e.last_check != 0 && e.last_check < NOW));
    assert!(oldest.windows(2).all(|w| w[0].last_check <= w[1].last_check));
    let oldest_paths: Vec<&str> = oldest.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        oldest_paths,
        vec!["/aged/4-0", "/aged/4-1", "/aged/3-0", "/aged/3-1", "/aged/2-0", "/aged/2-1"]
    );
}

#[test]
fn test_recheck_segment_is_capped_by_fraction() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    for i in 0..6 {
        add(&conn, &format!("/old/{}", i), NOW - (10 + i) * DAY);
    }
    let config = AuditConfig {
        recheck_fraction: 0.5,
        recheck_age: "1d".to_string(),
        ..AuditConfig::default()
    };

    let batch = get_list_at(&conn, &config, NOW, Some(4), &[]).unwrap();
    let paths: Vec<&str> = batch.iter().map(|e| e.path.as_str()).collect();
    // two rechecks, then the oldest-fill continues with the next oldest
    assert_eq!(paths, vec!["/old/5", "/old/4", "/old/3", "/old/2"]);
}

#[test]
fn test_unbounded_batch_returns_everything() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    seed_scenario(&conn);

    let batch = get_list_at(&conn, &scenario_config(), NOW, None, &[]).unwrap();
    assert_eq!(batch.len(), 22);
}

#[test]
fn test_priority_files_lead_and_are_consumed_once() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    add(&conn, "/zero/a", 0);
    add(&conn, "/zero/b", 0);

    let pending = dir.path().join("pending");
    fs::create_dir_all(&pending).unwrap();
    fs::write(pending.join("a.pri"), "/p/1\n\n  /p/2  \n").unwrap();
    fs::write(pending.join("b.pri"), "/p/3\n").unwrap();

    let config = AuditConfig {
        priority_glob: Some(format!("{}/*.pri", pending.display())),
        ..AuditConfig::default()
    };

    let batch = get_list_at(&conn, &config, NOW, Some(1), &[]).unwrap();
    let paths: Vec<&str> = batch.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/p/1", "/p/2", "/p/3", "/zero/a"]);
    assert!(batch[..3].iter().all(|e| e.is_file() && e.rowid.is_none()));

    assert!(!pending.join("a.pri").exists());
    assert!(pending.join("completed").join("a.pri").exists());
    assert!(pending.join("completed").join("b.pri").exists());

    let again = get_list_at(&conn, &config, NOW, Some(1), &[]).unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].path, "/zero/a");
}

#[test]
fn test_priority_files_move_to_configured_dir() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    let pending = dir.path().join("pending");
    let done = dir.path().join("done");
    fs::create_dir_all(&pending).unwrap();
    fs::write(pending.join("urgent.pri"), "/p/9\n").unwrap();

    let config = AuditConfig {
        priority_glob: Some(format!("{}/*.pri", pending.display())),
        completed_dir: Some(done.display().to_string()),
        ..AuditConfig::default()
    };

    let batch = get_list_at(&conn, &config, NOW, Some(0), &[]).unwrap();
    assert_eq!(batch.len(), 1);
    assert!(done.join("urgent.pri").exists());
}

#[test]
fn test_bad_priority_glob_is_pattern_error() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    let config = AuditConfig {
        priority_glob: Some("[".to_string()),
        ..AuditConfig::default()
    };
    let err = get_list_at(&conn, &config, NOW, Some(1), &[]).unwrap_err();
    assert!(matches!(err, crawlaudit::AuditError::Pattern(_)));
}

#[test]
fn test_unreadable_priority_file_does_not_block_batches() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    add(&conn, "/zero/a", 0);

    let pending = dir.path().join("pending");
    fs::create_dir_all(&pending).unwrap();
    fs::write(pending.join("a.pri"), "/p/urgent\n").unwrap();
    fs::write(pending.join("b.pri"), [0xff, 0xfe, b'\n']).unwrap();

    let config = AuditConfig {
        priority_glob: Some(format!("{}/*.pri", pending.display())),
        ..AuditConfig::default()
    };

    let batch = get_list_at(&conn, &config, NOW, Some(1), &[]).unwrap();
    let paths: Vec<&str> = batch.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/p/urgent", "/zero/a"]);
    assert!(pending.join("completed").join("a.pri").exists());
    assert!(pending.join("b.pri").exists());
    assert!(!pending.join("completed").join("b.pri").exists());

    let again = get_list_at(&conn, &config, NOW, Some(1), &[]).unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].path, "/zero/a");
}

#[test]
fn test_priority_files_stay_pending_when_batch_fails() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    let pending = dir.path().join("pending");
    fs::create_dir_all(&pending).unwrap();
    fs::write(pending.join("a.pri"), "/p/urgent\n").unwrap();

    let config = AuditConfig {
        priority_glob: Some(format!("{}/*.pri", pending.display())),
        recheck_age: "soon".to_string(),
        ..AuditConfig::default()
    };

    assert!(get_list_at(&conn, &config, NOW, Some(1), &[]).is_err());
    assert!(pending.join("a.pri").exists());
    assert!(!pending.join("completed").exists());
}

#[test]
fn test_new_entries_take_configured_probability() {
    let dir = TempDir::new().unwrap();
    let conn = open_catalog(&dir);
    let pending = dir.path().join("pending");
    fs::create_dir_all(&pending).unwrap();
    fs::write(pending.join("a.pri"), "/p/urgent\n").unwrap();

    let config = AuditConfig {
        priority_glob: Some(format!("{}/*.pri", pending.display())),
        default_probability: 0.9,
        ..AuditConfig::default()
    };

    let batch = get_list_at(&conn, &config, NOW, None, &["/archive".to_string()]).unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|e| e.probability == 0.9));

    let root = Checkable::directory("/archive").stored(&conn).unwrap().unwrap();
    assert_eq!(root.probability, 0.9);
}
