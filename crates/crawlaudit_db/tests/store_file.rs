use crawlaudit_db::{DbConnection, DbValue, Select};
use tempfile::TempDir;

#[test]
fn test_rows_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("nested").join("catalog.sqlite3");

    {
        let conn = DbConnection::open(&db_path).unwrap();
        conn.make_table("entries", &["path TEXT NOT NULL", "last_check INTEGER"])
            .unwrap();
        conn.insert(
            "entries",
            &["path", "last_check"],
            &[vec![DbValue::from("/a"), DbValue::from(0_i64)]],
        )
        .unwrap();
        assert!(conn.last_insert_rowid() > 0);
    }

    assert!(db_path.exists());
    let conn = DbConnection::open(&db_path).unwrap();
    assert!(conn.table_exists("entries").unwrap());
    let rows = conn
        .select(&Select::new("entries", &["path", "last_check"]))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name::<String>("path").unwrap(), "/a");
}

#[test]
fn test_two_handles_see_each_others_writes() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("catalog.sqlite3");

    let writer = DbConnection::open(&db_path).unwrap();
    writer.make_table("entries", &["path TEXT"]).unwrap();

    let reader = DbConnection::open_with_busy_timeout(&db_path, 100).unwrap();
    writer
        .execute("INSERT INTO entries (path) VALUES (?)", &["/x".into()])
        .unwrap();

    let count: i64 = reader
        .query_scalar("SELECT COUNT(*) FROM entries", &[])
        .unwrap();
    assert_eq!(count, 1);
}
