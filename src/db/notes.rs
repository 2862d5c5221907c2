use super::*;

const NOTE_COLUMNS: &str = "id, owner_id, meeting_id, account_id, kind, title, body,
                            created_at, updated_at";

/// Search terms: lowercase words of two or more characters, de-duplicated.
fn search_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query
        .split(|c: char| !c.is_alphanumeric() && c != '@' && c != '.' && c != '-')
        .map(|w| w.trim_matches('.').to_lowercase())
    {
        if word.chars().count() >= 2 && !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

impl PrepDb {
    // =========================================================================
    // Notes
    // =========================================================================

    /// Insert a free-form note.
    pub fn insert_note(&self, note: &DbNote) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO notes (
                id, owner_id, meeting_id, account_id, kind, title, body, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                note.id,
                note.owner_id,
                note.meeting_id,
                note.account_id,
                note.kind,
                note.title,
                note.body,
                note.created_at,
                note.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Write the generated prep note for `(owner, meeting)`, replacing the
    /// previous one. At most one `prep` note exists per owner and meeting.
    pub fn upsert_prep_note(
        &self,
        owner_id: &str,
        meeting_id: &str,
        account_id: Option<&str>,
        title: &str,
        body: &str,
    ) -> Result<DbNote, DbError> {
        self.with_transaction(|db| {
            let now = Self::now();
            let updated = db
                .conn
                .execute(
                    "UPDATE notes SET title = ?1, body = ?2,
                        account_id = COALESCE(?3, account_id), updated_at = ?4
                     WHERE owner_id = ?5 AND meeting_id = ?6 AND kind = 'prep'",
                    params![title, body, account_id, now, owner_id, meeting_id],
                )
                .map_err(|e| e.to_string())?;
            if updated == 0 {
                db.conn
                    .execute(
                        "INSERT INTO notes (
                            id, owner_id, meeting_id, account_id, kind, title, body,
                            created_at, updated_at
                         ) VALUES (?1, ?2, ?3, ?4, 'prep', ?5, ?6, ?7, ?7)",
                        params![Self::new_id(), owner_id, meeting_id, account_id, title, body, now],
                    )
                    .map_err(|e| e.to_string())?;
            }
            Ok(())
        })
        .map_err(DbError::Transaction)?;

        self.get_prep_note(owner_id, meeting_id)?
            .ok_or_else(|| DbError::Transaction(format!("prep note for {meeting_id} vanished")))
    }

    /// The generated prep note for a meeting, if any.
    pub fn get_prep_note(&self, owner_id: &str, meeting_id: &str) -> Result<Option<DbNote>, DbError> {
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM notes
             WHERE owner_id = ?1 AND meeting_id = ?2 AND kind = 'prep'"
        );
        Ok(self
            .conn
            .query_row(&sql, params![owner_id, meeting_id], Self::map_note_row)
            .optional()?)
    }

    /// Notes attached to a call either by its local id or by any external
    /// event id mapped onto it.
    pub fn get_notes_for_call(&self, owner_id: &str, call_id: &str) -> Result<Vec<DbNote>, DbError> {
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM notes
             WHERE owner_id = ?1
               AND (meeting_id = ?2
                    OR meeting_id IN (SELECT external_id FROM external_mappings
                                      WHERE call_id = ?2 AND owner_id = ?1))
             ORDER BY created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id, call_id], Self::map_note_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Term search over note titles and bodies.
    ///
    /// A note matches when it contains at least one term; hits are ranked by
    /// how many distinct terms they contain, then by recency.
    pub fn search_notes(&self, owner_id: &str, query: &str, limit: usize) -> Result<Vec<NoteSearchHit>, DbError> {
        let terms = search_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM notes
             WHERE owner_id = ?1 AND LENGTH(TRIM(body || title)) > 0
             ORDER BY updated_at DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id], Self::map_note_row)?;

        let mut hits = Vec::new();
        for row in rows {
            let note = row?;
            let haystack = format!("{} {}", note.title, note.body).to_lowercase();
            let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
            if score > 0 {
                hits.push(NoteSearchHit { note, score });
            }
        }
        // Stable sort keeps the recency order within a score.
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    fn map_note_row(row: &rusqlite::Row) -> rusqlite::Result<DbNote> {
        Ok(DbNote {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            meeting_id: row.get(2)?,
            account_id: row.get(3)?,
            kind: row.get(4)?,
            title: row.get(5)?,
            body: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}
