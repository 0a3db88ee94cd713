//! Titles, title ownership and level bonus titles

use rusqlite::{params, Connection, OptionalExtension};

use super::models::TitleRow;
use super::now_rfc3339;
use super::progress::satisfy_title_requirements;
use crate::types::{LaurelError, Result};

/// Create a title definition (catalog data, used for seeding)
pub fn create_title(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    cost: Option<i64>,
) -> Result<TitleRow> {
    if let Some(cost) = cost {
        if cost <= 0 {
            return Err(LaurelError::Validation(format!(
                "title cost must be positive, got {}",
                cost
            )));
        }
    }

    conn.execute(
        "INSERT INTO titles (name, description, cost) VALUES (?, ?, ?)",
        params![name, description, cost],
    )
    .map_err(|e| LaurelError::Database(format!("Title insert failed: {}", e)))?;

    Ok(TitleRow {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        description: description.map(str::to_string),
        cost,
    })
}

/// Get a title by id
pub fn get_title(conn: &Connection, title_id: i64) -> Result<Option<TitleRow>> {
    conn.query_row(
        "SELECT * FROM titles WHERE id = ?",
        params![title_id],
        |row| TitleRow::from_row(row),
    )
    .optional()
    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))
}

/// Whether the user already holds the title
pub fn user_has_title(conn: &Connection, user_id: i64, title_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM user_titles WHERE user_id = ? AND title_id = ?",
            params![user_id, title_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?;
    Ok(found.is_some())
}

/// Ids of every title the user holds, in acquisition order
pub fn list_user_titles(conn: &Connection, user_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT title_id FROM user_titles WHERE user_id = ? ORDER BY id")
        .map_err(|e| LaurelError::Database(format!("Prepare failed: {}", e)))?;

    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<i64>, _>>()
        .map_err(|e| LaurelError::Database(format!("Row parse failed: {}", e)))?;

    Ok(ids)
}

/// Give a title to a user and satisfy all of its requirements, in one transaction
///
/// Returns `false` when the user already held the title; nothing is written
/// in that case.
pub fn award_title(conn: &mut Connection, user_id: i64, title_id: i64) -> Result<bool> {
    let tx = conn
        .transaction()
        .map_err(|e| LaurelError::Database(format!("Transaction failed: {}", e)))?;

    if get_title(&tx, title_id)?.is_none() {
        return Err(LaurelError::NotFound(format!("title {} not found", title_id)));
    }
    if super::users::get_user(&tx, user_id)?.is_none() {
        return Err(LaurelError::NotFound(format!("user {} not found", user_id)));
    }

    let inserted = tx
        .execute(
            "INSERT INTO user_titles (user_id, title_id, acquired_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id, title_id) DO NOTHING",
            params![user_id, title_id, now_rfc3339()],
        )
        .map_err(|e| LaurelError::Database(format!("Title award failed: {}", e)))?;

    if inserted == 0 {
        return Ok(false);
    }

    satisfy_title_requirements(&tx, user_id, title_id)?;

    tx.commit()
        .map_err(|e| LaurelError::Database(format!("Commit failed: {}", e)))?;

    Ok(true)
}

/// Attach a bonus title to a level
pub fn set_level_title(conn: &Connection, level: i64, title_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO level_titles (level, title_id) VALUES (?, ?)
         ON CONFLICT(level) DO UPDATE SET title_id = excluded.title_id",
        params![level, title_id],
    )
    .map_err(|e| LaurelError::Database(format!("Level title insert failed: {}", e)))?;
    Ok(())
}

/// Bonus title for a level, if any
pub fn level_title(conn: &Connection, level: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT title_id FROM level_titles WHERE level = ?",
        params![level],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RequirementKind;
    use crate::db::progress::get_progress;
    use crate::db::requirements::create_requirement;
    use crate::db::schema::init_schema;
    use crate::db::users::create_user;

    #[test]
    fn test_award_title_once_with_backfill() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let user = create_user(&mut conn, None).unwrap();
        let title = create_title(&conn, "Curator", Some("Organized a shelf"), None).unwrap();
        let a = create_requirement(&conn, RequirementKind::Title, title.id, "add-game", 10).unwrap();
        let b = create_requirement(&conn, RequirementKind::Title, title.id, "tag-game", 4).unwrap();

        assert!(award_title(&mut conn, user.id, title.id).unwrap());
        assert!(!award_title(&mut conn, user.id, title.id).unwrap());
        assert!(user_has_title(&conn, user.id, title.id).unwrap());
        assert_eq!(list_user_titles(&conn, user.id).unwrap(), vec![title.id]);

        for (req, goal) in [(a.id, 10), (b.id, 4)] {
            let row = get_progress(&conn, RequirementKind::Title, user.id, req)
                .unwrap()
                .unwrap();
            assert_eq!(row.progress, goal);
            assert!(row.completed);
        }
    }

    #[test]
    fn test_award_unknown_title_writes_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let user = create_user(&mut conn, None).unwrap();

        let err = award_title(&mut conn, user.id, 77).unwrap_err();
        assert!(matches!(err, LaurelError::NotFound(_)));
        assert!(list_user_titles(&conn, user.id).unwrap().is_empty());
    }

    #[test]
    fn test_level_titles() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let veteran = create_title(&conn, "Veteran", None, None).unwrap();
        set_level_title(&conn, 5, veteran.id).unwrap();
        assert_eq!(level_title(&conn, 5).unwrap(), Some(veteran.id));
        assert_eq!(level_title(&conn, 4).unwrap(), None);
    }
}
