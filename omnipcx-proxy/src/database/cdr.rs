//! CDR store operations.

use rusqlite::params;
use rusqlite::types::ValueRef;

use super::{Database, DatabaseError, Result};

impl Database {
    /// All stored payloads, oldest first.
    ///
    /// Payloads written as TEXT by older stores are accepted as well.
    pub fn stored_cdrs(&self) -> Result<Vec<Vec<u8>>> {
        let mut stmt = self.conn.prepare("SELECT payload FROM cdr ORDER BY id")?;
        let mut rows = stmt.query([])?;

        let mut payloads = Vec::new();
        while let Some(row) = rows.next()? {
            let payload = match row.get_ref(0)? {
                ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
                other => {
                    return Err(DatabaseError::BadValue {
                        column: "payload",
                        detail: format!("{:?}", other.data_type()),
                    })
                }
            };
            payloads.push(payload);
        }
        Ok(payloads)
    }

    /// Append payloads in the given order within one transaction.
    pub fn insert_cdrs<'a, I>(&mut self, payloads: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare("INSERT INTO cdr (payload) VALUES (?1)")?;
            for payload in payloads {
                stmt.execute(params![payload])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn cdr_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cdr", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove every stored payload.
    pub fn clear_cdrs(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM cdr", [])?)
    }
}
