use super::*;

const ACCOUNT_COLUMNS: &str = "id, name, website, industry, employee_count, annual_revenue,
                               updated_at, archived";

const OPPORTUNITY_COLUMNS: &str = "id, account_id, name, stage, amount, close_date, updated_at";

impl PrepDb {
    // =========================================================================
    // Accounts
    // =========================================================================

    /// Insert or update an account.
    pub fn upsert_account(&self, account: &DbAccount) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO accounts (
                id, name, website, industry, employee_count, annual_revenue,
                updated_at, archived
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                website = COALESCE(excluded.website, accounts.website),
                industry = COALESCE(excluded.industry, accounts.industry),
                employee_count = COALESCE(excluded.employee_count, accounts.employee_count),
                annual_revenue = COALESCE(excluded.annual_revenue, accounts.annual_revenue),
                updated_at = excluded.updated_at,
                archived = excluded.archived",
            params![
                account.id,
                account.name,
                account.website,
                account.industry,
                account.employee_count,
                account.annual_revenue,
                account.updated_at,
                account.archived as i32,
            ],
        )?;
        Ok(())
    }

    /// Get an account by ID.
    pub fn get_account(&self, id: &str) -> Result<Option<DbAccount>, DbError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_account_row)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Get an account by name (case-insensitive).
    pub fn get_account_by_name(&self, name: &str) -> Result<Option<DbAccount>, DbError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE LOWER(name) = LOWER(?1) AND archived = 0
             ORDER BY rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![name.trim()], Self::map_account_row)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Get all active accounts in insertion order.
    pub fn get_all_accounts(&self) -> Result<Vec<DbAccount>, DbError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE archived = 0 ORDER BY rowid");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::map_account_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Accounts whose name occurs (case-insensitive substring) in `text`,
    /// in insertion order.
    pub fn find_accounts_named_in(&self, text: &str) -> Result<Vec<DbAccount>, DbError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE archived = 0
               AND LENGTH(TRIM(name)) > 0
               AND INSTR(LOWER(?1), LOWER(TRIM(name))) > 0
             ORDER BY rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![text], Self::map_account_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Accounts whose website domain is one of `domains`, in insertion order.
    ///
    /// Websites are stored as entered, so the comparison happens after
    /// normalizing each website in Rust.
    pub fn find_accounts_by_domains(&self, domains: &[String]) -> Result<Vec<DbAccount>, DbError> {
        if domains.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: Vec<String> = domains.iter().map(|d| d.trim().to_lowercase()).collect();
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE archived = 0 AND website IS NOT NULL
             ORDER BY rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::map_account_row)?;
        let mut matches = Vec::new();
        for row in rows {
            let account = row?;
            if let Some(domain) = account.website_domain() {
                if wanted.contains(&domain) {
                    matches.push(account);
                }
            }
        }
        Ok(matches)
    }

    fn map_account_row(row: &rusqlite::Row) -> rusqlite::Result<DbAccount> {
        Ok(DbAccount {
            id: row.get(0)?,
            name: row.get(1)?,
            website: row.get(2)?,
            industry: row.get(3)?,
            employee_count: row.get(4)?,
            annual_revenue: row.get(5)?,
            updated_at: row.get(6)?,
            archived: row.get::<_, i32>(7)? != 0,
        })
    }

    // =========================================================================
    // Opportunities
    // =========================================================================

    /// Insert or update an opportunity.
    pub fn upsert_opportunity(&self, opp: &DbOpportunity) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO opportunities (id, account_id, name, stage, amount, close_date, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                name = excluded.name,
                stage = excluded.stage,
                amount = excluded.amount,
                close_date = excluded.close_date,
                updated_at = excluded.updated_at",
            params![
                opp.id,
                opp.account_id,
                opp.name,
                opp.stage,
                opp.amount,
                opp.close_date,
                opp.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Opportunities for an account, open ones first, then most recently updated.
    pub fn get_opportunities_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<DbOpportunity>, DbError> {
        let sql = format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities
             WHERE account_id = ?1
             ORDER BY CASE WHEN LOWER(COALESCE(stage, '')) LIKE 'closed%' THEN 1 ELSE 0 END,
                      updated_at DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id], Self::map_opportunity_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Opportunities whose name occurs in `text`, paired with their account,
    /// in insertion order.
    pub fn find_opportunities_named_in(
        &self,
        text: &str,
    ) -> Result<Vec<(DbOpportunity, DbAccount)>, DbError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.account_id, o.name, o.stage, o.amount, o.close_date, o.updated_at,
                    a.id, a.name, a.website, a.industry, a.employee_count, a.annual_revenue,
                    a.updated_at, a.archived
             FROM opportunities o
             JOIN accounts a ON a.id = o.account_id
             WHERE a.archived = 0
               AND LENGTH(TRIM(o.name)) > 0
               AND INSTR(LOWER(?1), LOWER(TRIM(o.name))) > 0
             ORDER BY o.rowid",
        )?;
        let rows = stmt.query_map(params![text], |row| {
            let opp = Self::map_opportunity_row(row)?;
            let account = DbAccount {
                id: row.get(7)?,
                name: row.get(8)?,
                website: row.get(9)?,
                industry: row.get(10)?,
                employee_count: row.get(11)?,
                annual_revenue: row.get(12)?,
                updated_at: row.get(13)?,
                archived: row.get::<_, i32>(14)? != 0,
            };
            Ok((opp, account))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn map_opportunity_row(row: &rusqlite::Row) -> rusqlite::Result<DbOpportunity> {
        Ok(DbOpportunity {
            id: row.get(0)?,
            account_id: row.get(1)?,
            name: row.get(2)?,
            stage: row.get(3)?,
            amount: row.get(4)?,
            close_date: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::{sample_account, sample_opportunity, test_db};

    #[test]
    fn test_upsert_and_get_account() {
        let db = test_db();
        db.upsert_account(&sample_account("a1", "Acme Corp", Some("https://acme.com")))
            .unwrap();
        let account = db.get_account("a1").unwrap().unwrap();
        assert_eq!(account.name, "Acme Corp");
        assert_eq!(account.website_domain().as_deref(), Some("acme.com"));
        assert!(db.get_account("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_preserves_website_when_missing() {
        let db = test_db();
        db.upsert_account(&sample_account("a1", "Acme", Some("acme.com")))
            .unwrap();
        db.upsert_account(&sample_account("a1", "Acme Corp", None))
            .unwrap();
        let account = db.get_account("a1").unwrap().unwrap();
        assert_eq!(account.name, "Acme Corp");
        assert_eq!(account.website.as_deref(), Some("acme.com"));
    }

    #[test]
    fn test_find_accounts_named_in_title() {
        let db = test_db();
        db.upsert_account(&sample_account("a1", "Acme Corp", None))
            .unwrap();
        db.upsert_account(&sample_account("a2", "Globex", None)).unwrap();
        let hits = db.find_accounts_named_in("ACME CORP — Discovery").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a1");
        assert!(db.find_accounts_named_in("Weekly standup").unwrap().is_empty());
        assert!(db.find_accounts_named_in("").unwrap().is_empty());
    }

    #[test]
    fn test_find_accounts_by_domains_skips_archived() {
        let db = test_db();
        db.upsert_account(&sample_account("a1", "Acme", Some("https://www.acme.com/")))
            .unwrap();
        let mut retired = sample_account("a2", "Acme Old", Some("acme.com"));
        retired.archived = true;
        db.upsert_account(&retired).unwrap();
        let hits = db.find_accounts_by_domains(&["acme.com".to_string()]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a1");
    }

    #[test]
    fn test_opportunities_open_first_and_named_in() {
        let db = test_db();
        db.upsert_account(&sample_account("a1", "Acme", None)).unwrap();
        db.upsert_opportunity(&sample_opportunity("o1", "a1", "Acme Renewal 2025", "Closed Won", Some(50_000.0)))
            .unwrap();
        db.upsert_opportunity(&sample_opportunity("o2", "a1", "Project Falcon", "Proposal/Price Quote", Some(120_000.0)))
            .unwrap();

        let opps = db.get_opportunities_for_account("a1").unwrap();
        assert_eq!(opps[0].id, "o2");

        let hits = db.find_opportunities_named_in("Falcon kickoff: project falcon scope").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "o2");
        assert_eq!(hits[0].1.id, "a1");
    }
}
