//! Requirement definitions (title and mission variants)

use rusqlite::{params, Connection};

use super::models::{RequirementKind, RequirementRow};
use crate::types::{LaurelError, Result};

/// Define a requirement for a title or mission
///
/// Definitions are reference data written by administrative flows.
pub fn create_requirement(
    conn: &Connection,
    kind: RequirementKind,
    owner_id: i64,
    action_key: &str,
    goal: i64,
) -> Result<RequirementRow> {
    if goal <= 0 {
        return Err(LaurelError::Validation(format!(
            "requirement goal must be positive, got {}",
            goal
        )));
    }
    if action_key.trim().is_empty() {
        return Err(LaurelError::Validation(
            "requirement action key must not be empty".to_string(),
        ));
    }

    let sql = format!(
        "INSERT INTO {} ({}, action_key, goal) VALUES (?, ?, ?)",
        kind.requirements_table(),
        kind.owner_column()
    );
    conn.execute(&sql, params![owner_id, action_key, goal])
        .map_err(|e| LaurelError::Database(format!("Requirement insert failed: {}", e)))?;

    Ok(RequirementRow {
        id: conn.last_insert_rowid(),
        kind,
        action_key: action_key.to_string(),
        goal,
        owner_id,
    })
}

fn query_requirements(
    conn: &Connection,
    kind: RequirementKind,
    column: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Vec<RequirementRow>> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ? ORDER BY id",
        kind.requirements_table(),
        column
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| LaurelError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map([value], |row| RequirementRow::from_row(kind, row))
        .map_err(|e| LaurelError::Database(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LaurelError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Every requirement of `kind` matching an action key
pub fn list_by_action_key(
    conn: &Connection,
    kind: RequirementKind,
    action_key: &str,
) -> Result<Vec<RequirementRow>> {
    query_requirements(conn, kind, "action_key", &action_key)
}

/// Every requirement owned by one title or mission
pub fn list_for_owner(
    conn: &Connection,
    kind: RequirementKind,
    owner_id: i64,
) -> Result<Vec<RequirementRow>> {
    query_requirements(conn, kind, kind.owner_column(), &owner_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;
    use crate::db::titles::create_title;

    #[test]
    fn test_lookup_by_action_key_and_owner() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let title = create_title(&conn, "Photogenic", None, None).unwrap();
        let other = create_title(&conn, "Storyteller", None, None).unwrap();

        create_requirement(&conn, RequirementKind::Title, title.id, "set-profile-picture", 1)
            .unwrap();
        create_requirement(&conn, RequirementKind::Title, other.id, "set-profile-picture", 3)
            .unwrap();
        create_requirement(&conn, RequirementKind::Title, other.id, "write-review", 5).unwrap();

        let matched =
            list_by_action_key(&conn, RequirementKind::Title, "set-profile-picture").unwrap();
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|r| r.kind == RequirementKind::Title));

        let owned = list_for_owner(&conn, RequirementKind::Title, other.id).unwrap();
        assert_eq!(owned.len(), 2);

        let missions =
            list_by_action_key(&conn, RequirementKind::Mission, "set-profile-picture").unwrap();
        assert!(missions.is_empty());
    }

    #[test]
    fn test_goal_must_be_positive() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let title = create_title(&conn, "Zero", None, None).unwrap();
        let err = create_requirement(&conn, RequirementKind::Title, title.id, "x", 0).unwrap_err();
        assert!(matches!(err, LaurelError::Validation(_)));
    }
}
