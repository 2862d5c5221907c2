use super::*;

impl PrepDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    /// Insert or update a contact. Emails are stored lowercase and unique.
    pub fn upsert_contact(&self, contact: &DbContact) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO contacts (id, account_id, name, email, title, phone, updated_at)
             VALUES (?1, ?2, ?3, LOWER(TRIM(?4)), ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                account_id = COALESCE(excluded.account_id, contacts.account_id),
                name = excluded.name,
                email = excluded.email,
                title = COALESCE(excluded.title, contacts.title),
                phone = COALESCE(excluded.phone, contacts.phone),
                updated_at = excluded.updated_at",
            params![
                contact.id,
                contact.account_id,
                contact.name,
                contact.email,
                contact.title,
                contact.phone,
                contact.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Look up a contact by exact email (case-insensitive).
    pub fn get_contact_by_email(&self, email: &str) -> Result<Option<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, name, email, title, phone, updated_at
             FROM contacts WHERE email = LOWER(TRIM(?1))",
        )?;
        let mut rows = stmt.query_map(params![email], Self::map_contact_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Contacts matching any of `emails`, in the order the emails were given.
    pub fn find_contacts_by_emails(&self, emails: &[String]) -> Result<Vec<DbContact>, DbError> {
        let mut found = Vec::new();
        for email in emails {
            if let Some(contact) = self.get_contact_by_email(email)? {
                if !found.iter().any(|c: &DbContact| c.id == contact.id) {
                    found.push(contact);
                }
            }
        }
        Ok(found)
    }

    /// All contacts linked to an account, by name.
    pub fn get_contacts_for_account(&self, account_id: &str) -> Result<Vec<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, name, email, title, phone, updated_at
             FROM contacts WHERE account_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![account_id], Self::map_contact_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn map_contact_row(row: &rusqlite::Row) -> rusqlite::Result<DbContact> {
        Ok(DbContact {
            id: row.get(0)?,
            account_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            title: row.get(4)?,
            phone: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}
