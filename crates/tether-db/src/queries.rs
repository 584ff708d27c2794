use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use tether_types::models::ConnectionStatus;

use crate::Database;
use crate::error::StoreError;
use crate::models::{
    ConnectionRow, HistoryRow, MessageRow, PendingInvitationRow, SearchRow, UserRow, parse_uuid,
};

/// Outcome of a connection request. Duplicates are a no-op outcome, not an
/// error, so callers can distinguish "request sent" from "already tracked"
/// without error handling.
#[derive(Debug)]
pub enum RequestOutcome {
    Created(ConnectionRow),
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    Forbidden,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectOutcome {
    Removed,
    Forbidden,
    NotFound,
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id.to_string(), username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    pub fn get_username_by_id(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let name = conn
                .query_row(
                    "SELECT username FROM users WHERE id = ?1",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(name)
        })
    }

    /// Username fragment search, excluding the searching user. Each hit is
    /// annotated with the pair's connection status via a correlated subquery.
    pub fn search_users(
        &self,
        self_id: Uuid,
        fragment: &str,
    ) -> Result<Vec<SearchRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username,
                        (SELECT c.status FROM connections c
                          WHERE (c.user_id = ?1 AND c.connected_user_id = u.id)
                             OR (c.user_id = u.id AND c.connected_user_id = ?1))
                 FROM users u
                 WHERE u.id != ?1 AND u.username LIKE '%' || ?2 || '%'
                 ORDER BY u.username ASC",
            )?;

            let rows = stmt
                .query_map((self_id.to_string(), fragment), |row| {
                    Ok(SearchRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        connection_status: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages (store) --

    /// Persist a message. The id and timestamp are assigned here; the caller
    /// gets the full row back. Empty content and self-sends are rejected
    /// before anything touches the database.
    pub fn append_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }
        if sender_id == receiver_id {
            return Err(StoreError::SelfReference);
        }

        let timestamp = now_rfc3339();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                (
                    sender_id.to_string(),
                    receiver_id.to_string(),
                    content,
                    &timestamp,
                ),
            )?;

            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                content: content.to_string(),
                timestamp,
                read: false,
            })
        })
    }

    /// Full history between two users, both directions, oldest first.
    /// Ties on timestamp break on id so the ordering is deterministic.
    pub fn history_between(&self, a: Uuid, b: Uuid) -> Result<Vec<HistoryRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, m.receiver_id, u.username, m.content, m.timestamp, m.read
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.timestamp ASC, m.id ASC",
            )?;

            let rows = stmt
                .query_map((a.to_string(), b.to_string()), |row| {
                    Ok(HistoryRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                        sender_username: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        content: row.get(4)?,
                        timestamp: row.get(5)?,
                        read: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Count of unread messages sent by `from_user` to `to_user`.
    pub fn unread_count(&self, from_user: Uuid, to_user: Uuid) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
                (from_user.to_string(), to_user.to_string()),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Most recent message between two users, either direction.
    pub fn last_message(&self, a: Uuid, b: Uuid) -> Result<Option<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, sender_id, receiver_id, content, timestamp, read
                     FROM messages
                     WHERE (sender_id = ?1 AND receiver_id = ?2)
                        OR (sender_id = ?2 AND receiver_id = ?1)
                     ORDER BY timestamp DESC, id DESC
                     LIMIT 1",
                    (a.to_string(), b.to_string()),
                    map_message_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Mark everything `peer_id` sent to `reader_id` as read.
    /// Returns the number of rows flipped.
    pub fn mark_read_from(&self, reader_id: Uuid, peer_id: Uuid) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
                (peer_id.to_string(), reader_id.to_string()),
            )?;
            Ok(changed)
        })
    }

    // -- Connections (ledger) --

    /// File a connection request from `requester_id` to `target_id`.
    /// The pair is unordered: a record in either direction, whatever its
    /// status, makes this a no-op.
    pub fn request_connection(
        &self,
        requester_id: Uuid,
        target_id: Uuid,
    ) -> Result<RequestOutcome, StoreError> {
        self.with_conn(|conn| {
            if query_connection_between(conn, requester_id, target_id)?.is_some() {
                return Ok(RequestOutcome::AlreadyExists);
            }

            let created_at = now_rfc3339();
            conn.execute(
                "INSERT INTO connections (user_id, connected_user_id, status, created_at)
                 VALUES (?1, ?2, 'pending', ?3)",
                (
                    requester_id.to_string(),
                    target_id.to_string(),
                    &created_at,
                ),
            )?;

            Ok(RequestOutcome::Created(ConnectionRow {
                id: conn.last_insert_rowid(),
                user_id: requester_id.to_string(),
                connected_user_id: target_id.to_string(),
                status: "pending".to_string(),
                created_at,
            }))
        })
    }

    /// Accept a pending request. Only the invitee may do this; re-accepting
    /// an accepted record is a harmless no-op.
    pub fn accept_connection(
        &self,
        connection_id: i64,
        acting_user_id: Uuid,
    ) -> Result<AcceptOutcome, StoreError> {
        self.with_conn(|conn| {
            let Some(row) = query_connection_by_id(conn, connection_id)? else {
                return Ok(AcceptOutcome::NotFound);
            };
            if row.connected_user_id != acting_user_id.to_string() {
                return Ok(AcceptOutcome::Forbidden);
            }

            conn.execute(
                "UPDATE connections SET status = 'accepted' WHERE id = ?1",
                [connection_id],
            )?;
            Ok(AcceptOutcome::Accepted)
        })
    }

    /// Reject a request by deleting the record. Nothing remains, so the
    /// pair can be re-invited later.
    pub fn reject_connection(
        &self,
        connection_id: i64,
        acting_user_id: Uuid,
    ) -> Result<RejectOutcome, StoreError> {
        self.with_conn(|conn| {
            let Some(row) = query_connection_by_id(conn, connection_id)? else {
                return Ok(RejectOutcome::NotFound);
            };
            if row.connected_user_id != acting_user_id.to_string() {
                return Ok(RejectOutcome::Forbidden);
            }

            conn.execute("DELETE FROM connections WHERE id = ?1", [connection_id])?;
            Ok(RejectOutcome::Removed)
        })
    }

    /// Status of the (at most one) record for the pair, either direction.
    pub fn status_between(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<ConnectionStatus>, StoreError> {
        self.with_conn(|conn| {
            let Some(row) = query_connection_between(conn, a, b)? else {
                return Ok(None);
            };
            let status = ConnectionStatus::parse(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("connection status '{}'", row.status)))?;
            Ok(Some(status))
        })
    }

    /// Incoming pending invitations for a user, oldest first.
    pub fn pending_for(&self, user_id: Uuid) -> Result<Vec<PendingInvitationRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.user_id, u.username, c.created_at
                 FROM connections c
                 LEFT JOIN users u ON c.user_id = u.id
                 WHERE c.connected_user_id = ?1 AND c.status = 'pending'
                 ORDER BY c.created_at ASC, c.id ASC",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(PendingInvitationRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        sender_username: row
                            .get::<_, Option<String>>(2)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// All users with an accepted connection to `user_id`, scanning both
    /// directions of the pair.
    pub fn accepted_peers_of(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        self.with_conn(|conn| {
            let uid = user_id.to_string();
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN user_id = ?1 THEN connected_user_id ELSE user_id END
                 FROM connections
                 WHERE (user_id = ?1 OR connected_user_id = ?1) AND status = 'accepted'
                 ORDER BY id ASC",
            )?;

            let ids = stmt
                .query_map([&uid], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            ids.iter().map(|s| parse_uuid(s)).collect()
        })
    }
}

fn now_rfc3339() -> String {
    // Fixed-width fraction keeps lexicographic order == chronological order
    // for the TEXT timestamp column.
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>, StoreError> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;
    Ok(row)
}

fn query_connection_by_id(
    conn: &Connection,
    id: i64,
) -> Result<Option<ConnectionRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, connected_user_id, status, created_at
             FROM connections WHERE id = ?1",
            [id],
            map_connection_row,
        )
        .optional()?;
    Ok(row)
}

fn query_connection_between(
    conn: &Connection,
    a: Uuid,
    b: Uuid,
) -> Result<Option<ConnectionRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, connected_user_id, status, created_at
             FROM connections
             WHERE (user_id = ?1 AND connected_user_id = ?2)
                OR (user_id = ?2 AND connected_user_id = ?1)",
            (a.to_string(), b.to_string()),
            map_connection_row,
        )
        .optional()?;
    Ok(row)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
        read: row.get(5)?,
    })
}

fn map_connection_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRow> {
    Ok(ConnectionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        connected_user_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_user(db: &Database, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, username, "hash").unwrap();
        id
    }

    #[test]
    fn append_then_history_contains_message() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let row = db.append_message(alice, bob, "hi").unwrap();
        assert_eq!(row.content, "hi");
        assert!(!row.read);

        let history = db.history_between(alice, bob).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, row.id);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[0].sender_username, "alice");
    }

    #[test]
    fn append_rejects_empty_content() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        assert!(matches!(
            db.append_message(alice, bob, ""),
            Err(StoreError::EmptyContent)
        ));
        assert!(db.history_between(alice, bob).unwrap().is_empty());
    }

    #[test]
    fn append_rejects_self_send() {
        let db = test_db();
        let alice = seed_user(&db, "alice");

        assert!(matches!(
            db.append_message(alice, alice, "me"),
            Err(StoreError::SelfReference)
        ));
    }

    #[test]
    fn history_is_bidirectional_and_ordered() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        db.append_message(alice, bob, "one").unwrap();
        db.append_message(bob, alice, "two").unwrap();
        db.append_message(alice, bob, "three").unwrap();

        let history = db.history_between(bob, alice).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn history_ties_on_timestamp_break_on_id() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        // Insert two rows with an identical timestamp directly.
        db.with_conn(|conn| {
            for content in ["first", "second"] {
                conn.execute(
                    "INSERT INTO messages (sender_id, receiver_id, content, timestamp)
                     VALUES (?1, ?2, ?3, '2026-01-01T00:00:00.000000Z')",
                    (alice.to_string(), bob.to_string(), content),
                )?;
            }
            Ok(())
        })
        .unwrap();

        let history = db.history_between(alice, bob).unwrap();
        assert_eq!(history[0].content, "first");
        assert_eq!(history[1].content, "second");
        assert!(history[0].id < history[1].id);
    }

    #[test]
    fn unread_count_increases_and_mark_read_resets() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        assert_eq!(db.unread_count(alice, bob).unwrap(), 0);

        db.append_message(alice, bob, "a").unwrap();
        db.append_message(alice, bob, "b").unwrap();
        assert_eq!(db.unread_count(alice, bob).unwrap(), 2);

        // Direction matters: nothing unread from bob to alice.
        assert_eq!(db.unread_count(bob, alice).unwrap(), 0);

        let flipped = db.mark_read_from(bob, alice).unwrap();
        assert_eq!(flipped, 2);
        assert_eq!(db.unread_count(alice, bob).unwrap(), 0);

        // Idempotent: nothing left to flip.
        assert_eq!(db.mark_read_from(bob, alice).unwrap(), 0);
    }

    #[test]
    fn last_message_picks_newest() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        assert!(db.last_message(alice, bob).unwrap().is_none());

        db.append_message(alice, bob, "old").unwrap();
        db.append_message(bob, alice, "new").unwrap();

        let last = db.last_message(alice, bob).unwrap().unwrap();
        assert_eq!(last.content, "new");
    }

    #[test]
    fn request_is_order_independent() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        assert!(matches!(
            db.request_connection(alice, bob).unwrap(),
            RequestOutcome::Created(_)
        ));
        assert!(matches!(
            db.request_connection(bob, alice).unwrap(),
            RequestOutcome::AlreadyExists
        ));
        assert!(matches!(
            db.request_connection(alice, bob).unwrap(),
            RequestOutcome::AlreadyExists
        ));
    }

    #[test]
    fn only_invitee_may_accept() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let RequestOutcome::Created(row) = db.request_connection(alice, bob).unwrap() else {
            panic!("expected created");
        };

        // The requester may not accept their own invitation.
        assert_eq!(
            db.accept_connection(row.id, alice).unwrap(),
            AcceptOutcome::Forbidden
        );
        assert_eq!(
            db.status_between(alice, bob).unwrap(),
            Some(ConnectionStatus::Pending)
        );

        assert_eq!(
            db.accept_connection(row.id, bob).unwrap(),
            AcceptOutcome::Accepted
        );
        assert_eq!(
            db.status_between(alice, bob).unwrap(),
            Some(ConnectionStatus::Accepted)
        );

        // Re-accepting is a no-op, not an error.
        assert_eq!(
            db.accept_connection(row.id, bob).unwrap(),
            AcceptOutcome::Accepted
        );
    }

    #[test]
    fn accept_unknown_connection_is_not_found() {
        let db = test_db();
        let alice = seed_user(&db, "alice");

        assert_eq!(
            db.accept_connection(999, alice).unwrap(),
            AcceptOutcome::NotFound
        );
        assert_eq!(
            db.reject_connection(999, alice).unwrap(),
            RejectOutcome::NotFound
        );
    }

    #[test]
    fn reject_deletes_record_and_allows_rerequest() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let RequestOutcome::Created(row) = db.request_connection(alice, bob).unwrap() else {
            panic!("expected created");
        };

        assert_eq!(
            db.reject_connection(row.id, alice).unwrap(),
            RejectOutcome::Forbidden
        );
        assert_eq!(
            db.reject_connection(row.id, bob).unwrap(),
            RejectOutcome::Removed
        );
        assert!(db.status_between(alice, bob).unwrap().is_none());

        // No history blocks a fresh request.
        assert!(matches!(
            db.request_connection(alice, bob).unwrap(),
            RequestOutcome::Created(_)
        ));
    }

    #[test]
    fn pending_for_lists_incoming_oldest_first() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let carol = seed_user(&db, "carol");

        db.request_connection(bob, alice).unwrap();
        db.request_connection(carol, alice).unwrap();
        // Outgoing requests never show up as pending for the requester.
        db.request_connection(alice, seed_user(&db, "dave")).unwrap();

        let pending = db.pending_for(alice).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].sender_username, "bob");
        assert_eq!(pending[1].sender_username, "carol");
    }

    #[test]
    fn accepted_peers_scan_both_directions() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let carol = seed_user(&db, "carol");

        let RequestOutcome::Created(r1) = db.request_connection(alice, bob).unwrap() else {
            panic!("expected created");
        };
        db.accept_connection(r1.id, bob).unwrap();

        let RequestOutcome::Created(r2) = db.request_connection(carol, alice).unwrap() else {
            panic!("expected created");
        };
        db.accept_connection(r2.id, alice).unwrap();

        let mut peers = db.accepted_peers_of(alice).unwrap();
        peers.sort();
        let mut expected = vec![bob, carol];
        expected.sort();
        assert_eq!(peers, expected);

        assert_eq!(db.accepted_peers_of(bob).unwrap(), vec![alice]);
    }

    #[test]
    fn search_excludes_self_and_annotates_status() {
        let db = test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bobcat");
        let carol = seed_user(&db, "carolbob");

        // alice <-> bobcat accepted; carolbob invited alice (pending).
        let RequestOutcome::Created(r) = db.request_connection(alice, bob).unwrap() else {
            panic!("expected created");
        };
        db.accept_connection(r.id, bob).unwrap();
        db.request_connection(carol, alice).unwrap();

        let hits = db.search_users(alice, "bob").unwrap();
        assert_eq!(hits.len(), 2);

        let bobcat = hits.iter().find(|h| h.username == "bobcat").unwrap();
        assert_eq!(bobcat.connection_status.as_deref(), Some("accepted"));

        let carolbob = hits.iter().find(|h| h.username == "carolbob").unwrap();
        assert_eq!(carolbob.connection_status.as_deref(), Some("pending"));

        // A stranger has no annotation, and the searcher never matches herself.
        seed_user(&db, "bobby");
        let hits = db.search_users(alice, "bob").unwrap();
        let bobby = hits.iter().find(|h| h.username == "bobby").unwrap();
        assert!(bobby.connection_status.is_none());
        assert!(hits.iter().all(|h| h.id != alice.to_string()));
    }
}
