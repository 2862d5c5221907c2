use super::*;

const CALL_COLUMNS: &str = "c.id, c.owner_id, c.title, c.description, c.scheduled_start,
                            c.scheduled_end, c.status, c.account_id, c.created_at, c.updated_at";

impl PrepDb {
    // =========================================================================
    // Calls + external mappings
    // =========================================================================

    /// Idempotently map an external event onto a local call record.
    ///
    /// The first open creates the call and its `(owner, kind, external_id)`
    /// mapping; later opens patch title, schedule and status on the same row.
    /// Lookup and insert share one `BEGIN IMMEDIATE` transaction, and the
    /// mapping's primary key rejects a second row for the same key.
    pub fn ensure_call(
        &self,
        owner_id: &str,
        integration_kind: &str,
        external_id: &str,
        meeting: &CallUpsert,
    ) -> Result<EnsuredCall, DbError> {
        self.with_transaction(|db| {
            db.ensure_call_inner(owner_id, integration_kind, external_id, meeting)
                .map_err(|e| e.to_string())
        })
        .map_err(DbError::Transaction)
    }

    fn ensure_call_inner(
        &self,
        owner_id: &str,
        integration_kind: &str,
        external_id: &str,
        meeting: &CallUpsert,
    ) -> Result<EnsuredCall, DbError> {
        let now = Self::now();

        if let Some(call_id) = self.get_mapped_call_id(owner_id, integration_kind, external_id)? {
            self.patch_call(&call_id, meeting, &now)?;
            self.conn.execute(
                "UPDATE external_mappings SET updated_at = ?1
                 WHERE owner_id = ?2 AND integration_kind = ?3 AND external_id = ?4",
                params![now, owner_id, integration_kind, external_id],
            )?;
            return Ok(EnsuredCall {
                call_id,
                created: false,
            });
        }

        let call_id = Self::new_id();
        self.conn.execute(
            "INSERT INTO calls (
                id, owner_id, title, description, scheduled_start, scheduled_end,
                status, account_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)",
            params![
                call_id,
                owner_id,
                meeting.title,
                meeting.description,
                meeting.scheduled_start,
                meeting.scheduled_end,
                meeting.status.as_deref().unwrap_or("scheduled"),
                now,
            ],
        )?;
        self.conn.execute(
            "INSERT INTO external_mappings (
                owner_id, integration_kind, external_id, call_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![owner_id, integration_kind, external_id, call_id, now],
        )?;

        self.replace_call_attendees(&call_id, &meeting.attendee_emails)?;
        Ok(EnsuredCall {
            call_id,
            created: true,
        })
    }

    fn patch_call(&self, call_id: &str, meeting: &CallUpsert, now: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE calls SET
                title = ?1,
                description = COALESCE(?2, description),
                scheduled_start = COALESCE(?3, scheduled_start),
                scheduled_end = COALESCE(?4, scheduled_end),
                status = COALESCE(?5, status),
                updated_at = ?6
             WHERE id = ?7",
            params![
                meeting.title,
                meeting.description,
                meeting.scheduled_start,
                meeting.scheduled_end,
                meeting.status,
                now,
                call_id,
            ],
        )?;
        if !meeting.attendee_emails.is_empty() {
            self.replace_call_attendees(call_id, &meeting.attendee_emails)?;
        }
        Ok(())
    }

    fn replace_call_attendees(&self, call_id: &str, emails: &[String]) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM call_attendees WHERE call_id = ?1",
            params![call_id],
        )?;
        for email in emails {
            self.conn.execute(
                "INSERT OR IGNORE INTO call_attendees (call_id, email) VALUES (?1, LOWER(TRIM(?2)))",
                params![call_id, email],
            )?;
        }
        Ok(())
    }

    /// Local call id for an external event, if it has been opened before.
    pub fn get_mapped_call_id(
        &self,
        owner_id: &str,
        integration_kind: &str,
        external_id: &str,
    ) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT call_id FROM external_mappings
                 WHERE owner_id = ?1 AND integration_kind = ?2 AND external_id = ?3",
                params![owner_id, integration_kind, external_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Every mapping that points at a call.
    pub fn get_mappings_for_call(&self, call_id: &str) -> Result<Vec<DbExternalMapping>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT owner_id, integration_kind, external_id, call_id, created_at, updated_at
             FROM external_mappings WHERE call_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![call_id], |row| {
            Ok(DbExternalMapping {
                owner_id: row.get(0)?,
                integration_kind: row.get(1)?,
                external_id: row.get(2)?,
                call_id: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Get a call by ID.
    pub fn get_call(&self, id: &str) -> Result<Option<DbCall>, DbError> {
        let sql = format!("SELECT {CALL_COLUMNS} FROM calls c WHERE c.id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_call_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Attendee emails recorded for a call.
    pub fn get_call_attendees(&self, call_id: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT email FROM call_attendees WHERE call_id = ?1 ORDER BY email")?;
        let rows = stmt.query_map(params![call_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Link a call to the account it resolved to.
    pub fn set_call_account(&self, call_id: &str, account_id: Option<&str>) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE calls SET account_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![account_id, Self::now(), call_id],
        )?;
        Ok(())
    }

    /// Whether the account has any call that started before `before`.
    pub fn has_prior_calls_for_account(
        &self,
        account_id: &str,
        before: &str,
        exclude_call_id: Option<&str>,
    ) -> Result<bool, DbError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM calls
                WHERE account_id = ?1
                  AND COALESCE(scheduled_start, created_at) < ?2
                  AND (?3 IS NULL OR id != ?3)
             )",
            params![account_id, before, exclude_call_id],
            |row| row.get(0),
        )?)
    }

    /// Call-history search joining calls, linked account, attendee emails,
    /// stored prep summaries and prep notes. Most recent first.
    pub fn search_calls(&self, search: &CallSearch) -> Result<Vec<CallHistoryRow>, DbError> {
        let sql = format!(
            "SELECT {CALL_COLUMNS}, a.name, p.summary
             FROM calls c
             LEFT JOIN accounts a ON a.id = c.account_id
             LEFT JOIN prep_records p ON p.call_id = c.id
             WHERE c.owner_id = ?1
               AND COALESCE(c.scheduled_start, c.created_at) >= ?2
               AND COALESCE(c.scheduled_start, c.created_at) <= ?3
               AND (?4 IS NULL OR c.id != ?4)
               AND (
                    (?5 IS NULL AND ?6 IS NULL AND ?7 IS NULL AND ?8 IS NULL)
                 OR (?5 IS NOT NULL AND EXISTS (
                        SELECT 1 FROM call_attendees ca
                        WHERE ca.call_id = c.id AND ca.email = LOWER(TRIM(?5))))
                 OR (?6 IS NOT NULL AND c.account_id = ?6)
                 OR (?7 IS NOT NULL AND LOWER(a.name) = LOWER(TRIM(?7)))
                 OR (?8 IS NOT NULL AND EXISTS (
                        SELECT 1 FROM call_attendees ca
                        WHERE ca.call_id = c.id AND ca.email LIKE '%@' || LOWER(TRIM(?8))))
               )
             ORDER BY COALESCE(c.scheduled_start, c.created_at) DESC
             LIMIT ?9"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                search.owner_id,
                search.since,
                search.until,
                search.exclude_call_id,
                search.contact_email,
                search.account_id,
                search.account_name,
                search.domain,
                search.limit,
            ],
            |row| {
                let call = Self::map_call_row(row)?;
                let account_name: Option<String> = row.get(10)?;
                let prep_summary: Option<String> = row.get(11)?;
                Ok((call, account_name, prep_summary))
            },
        )?;
        let joined = rows.collect::<Result<Vec<_>, _>>()?;

        let mut history = Vec::with_capacity(joined.len());
        for (call, account_name, prep_summary) in joined {
            let contact_emails = self.get_call_attendees(&call.id)?;
            let prep_notes = self
                .get_notes_for_call(&search.owner_id, &call.id)?
                .into_iter()
                .map(|n| n.body)
                .filter(|b| !b.trim().is_empty())
                .collect();
            history.push(CallHistoryRow {
                call,
                account_name,
                contact_emails,
                prep_summary,
                prep_notes,
            });
        }
        Ok(history)
    }

    fn map_call_row(row: &rusqlite::Row) -> rusqlite::Result<DbCall> {
        Ok(DbCall {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            scheduled_start: row.get(4)?,
            scheduled_end: row.get(5)?,
            status: row.get(6)?,
            account_id: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_account, test_db};

    fn upsert(title: &str, start: &str, emails: &[&str]) -> CallUpsert {
        CallUpsert {
            title: title.to_string(),
            description: None,
            scheduled_start: Some(start.to_string()),
            scheduled_end: None,
            status: Some("confirmed".to_string()),
            attendee_emails: emails.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn test_ensure_call_is_idempotent() {
        let db = test_db();
        let meeting = upsert("Acme sync", "2026-03-01T15:00:00+00:00", &["ceo@acme.com"]);
        let first = db.ensure_call("u1", "calendar", "evt-1", &meeting).unwrap();
        let second = db.ensure_call("u1", "calendar", "evt-1", &meeting).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.call_id, second.call_id);

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM calls", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_mapping_key_is_unique() {
        let db = test_db();
        let meeting = upsert("Acme sync", "2026-03-01T15:00:00+00:00", &[]);
        let first = db.ensure_call("u1", "calendar", "evt-1", &meeting).unwrap();
        let duplicate = db.conn_ref().execute(
            "INSERT INTO external_mappings (
                owner_id, integration_kind, external_id, call_id, created_at, updated_at
             ) VALUES ('u1', 'calendar', 'evt-1', ?1, '', '')",
            params![first.call_id],
        );
        assert!(duplicate.is_err());
        assert_eq!(
            db.get_mapped_call_id("u1", "calendar", "evt-1").unwrap(),
            Some(first.call_id)
        );
    }

    #[test]
    fn test_ensure_call_patches_existing_record() {
        let db = test_db();
        let first = db
            .ensure_call("u1", "calendar", "evt-1", &upsert("Acme sync", "2026-03-01T15:00:00+00:00", &[]))
            .unwrap();
        let mut moved = upsert("Acme sync (moved)", "2026-03-02T16:00:00+00:00", &["cto@acme.com"]);
        moved.status = Some("tentative".to_string());
        let second = db.ensure_call("u1", "calendar", "evt-1", &moved).unwrap();
        assert_eq!(first.call_id, second.call_id);

        let call = db.get_call(&first.call_id).unwrap().unwrap();
        assert_eq!(call.title, "Acme sync (moved)");
        assert_eq!(call.scheduled_start.as_deref(), Some("2026-03-02T16:00:00+00:00"));
        assert_eq!(call.status, "tentative");
        assert_eq!(db.get_call_attendees(&first.call_id).unwrap(), vec!["cto@acme.com"]);
    }

    #[test]
    fn test_ensure_call_scopes_by_owner_and_kind() {
        let db = test_db();
        let meeting = upsert("Sync", "2026-03-01T15:00:00+00:00", &[]);
        let a = db.ensure_call("u1", "calendar", "evt-1", &meeting).unwrap();
        let b = db.ensure_call("u2", "calendar", "evt-1", &meeting).unwrap();
        let c = db.ensure_call("u1", "zoom", "evt-1", &meeting).unwrap();
        assert_ne!(a.call_id, b.call_id);
        assert_ne!(a.call_id, c.call_id);
        assert_eq!(db.get_mappings_for_call(&a.call_id).unwrap().len(), 1);
    }

    #[test]
    fn test_prior_calls_for_account() {
        let db = test_db();
        db.upsert_account(&sample_account("a1", "Acme", None)).unwrap();
        let past = db
            .ensure_call("u1", "calendar", "evt-old", &upsert("Intro", "2026-01-10T15:00:00+00:00", &[]))
            .unwrap();
        db.set_call_account(&past.call_id, Some("a1")).unwrap();

        assert!(db
            .has_prior_calls_for_account("a1", "2026-02-01T00:00:00+00:00", None)
            .unwrap());
        assert!(!db
            .has_prior_calls_for_account("a1", "2026-01-01T00:00:00+00:00", None)
            .unwrap());
        assert!(!db
            .has_prior_calls_for_account("a1", "2026-02-01T00:00:00+00:00", Some(&past.call_id))
            .unwrap());
    }

    #[test]
    fn test_search_calls_by_selectors() {
        let db = test_db();
        db.upsert_account(&sample_account("a1", "Acme Corp", None))
            .unwrap();
        let first = db
            .ensure_call("u1", "calendar", "e1", &upsert("Intro", "2026-01-10T15:00:00+00:00", &["ceo@acme.com"]))
            .unwrap();
        db.set_call_account(&first.call_id, Some("a1")).unwrap();
        db.ensure_call("u1", "calendar", "e2", &upsert("Globex", "2026-01-12T15:00:00+00:00", &["raj@globex.com"]))
            .unwrap();
        db.ensure_call("u2", "calendar", "e3", &upsert("Other owner", "2026-01-12T15:00:00+00:00", &["ceo@acme.com"]))
            .unwrap();

        let base = CallSearch {
            owner_id: "u1".to_string(),
            since: "2026-01-01T00:00:00+00:00".to_string(),
            until: "2026-02-01T00:00:00+00:00".to_string(),
            limit: 10,
            ..Default::default()
        };

        let by_email = db
            .search_calls(&CallSearch {
                contact_email: Some("CEO@acme.com".to_string()),
                ..base.clone()
            })
            .unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].account_name.as_deref(), Some("Acme Corp"));
        assert_eq!(by_email[0].contact_emails, vec!["ceo@acme.com"]);

        let by_name = db
            .search_calls(&CallSearch {
                account_name: Some("acme corp".to_string()),
                ..base.clone()
            })
            .unwrap();
        assert_eq!(by_name.len(), 1);

        let by_domain = db
            .search_calls(&CallSearch {
                domain: Some("globex.com".to_string()),
                ..base.clone()
            })
            .unwrap();
        assert_eq!(by_domain.len(), 1);
        assert_eq!(by_domain[0].call.title, "Globex");

        let everything = db.search_calls(&base).unwrap();
        assert_eq!(everything.len(), 2);
        assert_eq!(everything[0].call.title, "Globex");

        let limited = db.search_calls(&CallSearch { limit: 1, ..base }).unwrap();
        assert_eq!(limited.len(), 1);
    }
}
