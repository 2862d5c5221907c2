use super::*;

const PREP_COLUMNS: &str = "id, call_id, owner_id, account_id, mode, confidence, match_reason,
                            sheet_json, methodology_json, summary, created_at, updated_at";

impl PrepDb {
    // =========================================================================
    // Preparation records
    // =========================================================================

    /// Insert or update the preparation record for a call.
    ///
    /// `prep_records.call_id` is unique, so a regeneration updates the existing
    /// row in place and keeps its id and `created_at`. `record.id` is only used
    /// when no record exists yet. Returns the stored row.
    pub fn upsert_prep_record(&self, record: &DbPrepRecord) -> Result<DbPrepRecord, DbError> {
        self.conn.execute(
            "INSERT INTO prep_records (
                id, call_id, owner_id, account_id, mode, confidence, match_reason,
                sheet_json, methodology_json, summary, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT(call_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                account_id = COALESCE(excluded.account_id, prep_records.account_id),
                mode = excluded.mode,
                confidence = excluded.confidence,
                match_reason = excluded.match_reason,
                sheet_json = excluded.sheet_json,
                methodology_json = excluded.methodology_json,
                summary = excluded.summary,
                updated_at = excluded.updated_at",
            params![
                record.id,
                record.call_id,
                record.owner_id,
                record.account_id,
                record.mode,
                record.confidence,
                record.match_reason,
                record.sheet_json,
                record.methodology_json,
                record.summary,
                Self::now(),
            ],
        )?;
        self.get_prep_record_for_call(&record.call_id)?
            .ok_or_else(|| DbError::Transaction(format!("prep record for {} vanished", record.call_id)))
    }

    /// The stored preparation record for a call, if any.
    pub fn get_prep_record_for_call(&self, call_id: &str) -> Result<Option<DbPrepRecord>, DbError> {
        let sql = format!("SELECT {PREP_COLUMNS} FROM prep_records WHERE call_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![call_id], Self::map_prep_row)
            .optional()?)
    }

    /// Count of stored preparation records for a call (0 or 1).
    pub fn count_prep_records_for_call(&self, call_id: &str) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM prep_records WHERE call_id = ?1",
            params![call_id],
            |row| row.get(0),
        )?)
    }

    fn map_prep_row(row: &rusqlite::Row) -> rusqlite::Result<DbPrepRecord> {
        Ok(DbPrepRecord {
            id: row.get(0)?,
            call_id: row.get(1)?,
            owner_id: row.get(2)?,
            account_id: row.get(3)?,
            mode: row.get(4)?,
            confidence: row.get(5)?,
            match_reason: row.get(6)?,
            sheet_json: row.get(7)?,
            methodology_json: row.get(8)?,
            summary: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    fn record(id: &str, call_id: &str, summary: &str) -> DbPrepRecord {
        DbPrepRecord {
            id: id.to_string(),
            call_id: call_id.to_string(),
            owner_id: "u1".to_string(),
            account_id: Some("a1".to_string()),
            mode: "full".to_string(),
            confidence: 75,
            match_reason: "email_match".to_string(),
            sheet_json: "{}".to_string(),
            methodology_json: None,
            summary: Some(summary.to_string()),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_upsert_prep_record_keeps_id_on_regenerate() {
        let db = test_db();
        let first = db.upsert_prep_record(&record("p1", "call-1", "v1")).unwrap();
        let second = db.upsert_prep_record(&record("p2", "call-1", "v2")).unwrap();

        assert_eq!(first.id, "p1");
        assert_eq!(second.id, "p1");
        assert_eq!(second.summary.as_deref(), Some("v2"));
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(db.count_prep_records_for_call("call-1").unwrap(), 1);
    }

    #[test]
    fn test_upsert_keeps_account_when_regenerated_without_one() {
        let db = test_db();
        db.upsert_prep_record(&record("p1", "call-1", "v1")).unwrap();
        let mut again = record("p2", "call-1", "v2");
        again.account_id = None;
        let stored = db.upsert_prep_record(&again).unwrap();
        assert_eq!(stored.account_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_missing_prep_record() {
        let db = test_db();
        assert!(db.get_prep_record_for_call("nope").unwrap().is_none());
    }
}
