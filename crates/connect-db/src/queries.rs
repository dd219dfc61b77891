use crate::Database;
use crate::models::{MessageRow, PasswordResetRow, PostRow, ReplyRow, UserRow};
use anyhow::Result;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row};

impl Database {
    // -- Users --

    #[allow(clippy::too_many_arguments)]
    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        bio: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, username, email, password, bio, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, name, username, email, password_hash, bio, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Uniqueness check for profile updates: does another user already hold
    /// this value in `column`?
    fn taken_by_other(&self, column: &str, value: &str, user_id: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM users WHERE {column} = ?1 AND id != ?2");
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(&sql, [value, user_id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn username_taken_by_other(&self, username: &str, user_id: &str) -> Result<bool> {
        self.taken_by_other("username", username, user_id)
    }

    pub fn email_taken_by_other(&self, email: &str, user_id: &str) -> Result<bool> {
        self.taken_by_other("email", email, user_id)
    }

    pub fn update_user_profile(
        &self,
        id: &str,
        name: &str,
        username: &str,
        email: &str,
        bio: &str,
        profile_picture: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users
                 SET name = ?2, username = ?3, email = ?4, bio = ?5, profile_picture = ?6
                 WHERE id = ?1",
                rusqlite::params![id, name, username, email, bio, profile_picture],
            )?;
            Ok(())
        })
    }

    pub fn set_user_password(&self, id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                rusqlite::params![id, password_hash],
            )?;
            Ok(())
        })
    }

    /// Substring match on name or username, excluding the caller. Feeds the
    /// new-message user picker.
    pub fn search_users(&self, query: &str, exclude_id: &str, limit: u32) -> Result<Vec<UserRow>> {
        let pattern = format!("%{}%", query);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, username, email, password, bio, profile_picture, created_at
                 FROM users
                 WHERE (name LIKE ?1 OR username LIKE ?1) AND id != ?2
                 ORDER BY username
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![pattern, exclude_id, limit], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Batch-fetch display profiles for a set of user ids (conversation
    /// decoration).
    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, name, username, email, password, bio, profile_picture, created_at
                 FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn count_users(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    // -- Password resets --

    pub fn insert_password_reset(
        &self,
        id: &str,
        user_id: &str,
        token: &str,
        expires_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_resets (id, user_id, token, expires_at, used)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                rusqlite::params![id, user_id, token, expires_at],
            )?;
            Ok(())
        })
    }

    /// An unused, unexpired reset for this token, if any.
    pub fn get_active_reset(&self, token: &str, now: &str) -> Result<Option<PasswordResetRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, token, expires_at, used
                 FROM password_resets
                 WHERE token = ?1 AND expires_at > ?2 AND used = 0",
            )?;

            let row = stmt
                .query_row([token, now], |row| {
                    Ok(PasswordResetRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        token: row.get(2)?,
                        expires_at: row.get(3)?,
                        used: row.get(4)?,
                    })
                })
                .optional()?;

            Ok(row)
        })
    }

    pub fn mark_reset_used(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE password_resets SET used = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Posts --

    #[allow(clippy::too_many_arguments)]
    pub fn insert_post(
        &self,
        id: &str,
        author_id: &str,
        kind: &str,
        title: &str,
        content: &str,
        tags_json: &str,
        company: Option<&str>,
        location: Option<&str>,
        job_link: Option<&str>,
        document_name: Option<&str>,
        document_url: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, type, title, content, tags, company, location,
                                    job_link, document_name, document_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                rusqlite::params![
                    id,
                    author_id,
                    kind,
                    title,
                    content,
                    tags_json,
                    company,
                    location,
                    job_link,
                    document_name,
                    document_url,
                    created_at
                ],
            )?;
            Ok(())
        })
    }

    /// Feed query: newest first, optional category filter, optional
    /// case-insensitive search over title/content/author/tags.
    pub fn get_posts(
        &self,
        skip: u32,
        limit: u32,
        search: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT p.id, p.author_id, p.type, p.title, p.content, p.tags, p.company,
                        p.location, p.job_link, p.document_name, p.document_url,
                        p.created_at, p.updated_at,
                        u.name, u.username, u.profile_picture
                 FROM posts p
                 JOIN users u ON p.author_id = u.id",
            );

            let pattern = search.map(|s| format!("%{}%", s));
            let limit = limit as i64;
            let skip = skip as i64;

            let mut clauses: Vec<&str> = Vec::new();
            let mut params: Vec<&dyn ToSql> = Vec::new();

            if let Some(cat) = &category {
                clauses.push("p.type = ?");
                params.push(cat);
            }
            if let Some(pat) = &pattern {
                clauses.push(
                    "(p.title LIKE ? OR p.content LIKE ? OR u.name LIKE ?
                      OR u.username LIKE ? OR p.tags LIKE ?)",
                );
                for _ in 0..5 {
                    params.push(pat);
                }
            }

            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY p.created_at DESC LIMIT ? OFFSET ?");
            params.push(&limit);
            params.push(&skip);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn post_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM posts WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn count_posts_by_author(&self, author_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
                [author_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn insert_reply(
        &self,
        id: &str,
        post_id: &str,
        author_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO replies (id, post_id, author_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, post_id, author_id, content, created_at],
            )?;
            conn.execute(
                "UPDATE posts SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![post_id, created_at],
            )?;
            Ok(())
        })
    }

    /// Batch-fetch replies for a page of posts in one query (avoids N+1).
    pub fn get_replies_for_posts(&self, post_ids: &[String]) -> Result<Vec<ReplyRow>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=post_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT r.id, r.post_id, r.author_id, r.content, r.created_at,
                        u.name, u.username, u.profile_picture
                 FROM replies r
                 JOIN users u ON r.author_id = u.id
                 WHERE r.post_id IN ({})
                 ORDER BY r.created_at, r.rowid",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = post_ids.iter().map(|id| id as &dyn ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReplyRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        author_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                        author_name: row.get(5)?,
                        author_username: row.get(6)?,
                        author_profile_picture: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, content, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![id, sender_id, recipient_id, content, created_at],
            )?;
            Ok(())
        })
    }

    /// The full bidirectional thread between two users, oldest first.
    /// rowid breaks timestamp ties in insertion order.
    pub fn messages_between(&self, a: &str, b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, content, read, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY created_at, rowid",
            )?;

            let rows = stmt
                .query_map([a, b], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Every message the user sent or received, oldest first: the broad
    /// predicate the conversation deriver folds over.
    pub fn messages_for_user(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, content, read, created_at
                 FROM messages
                 WHERE sender_id = ?1 OR recipient_id = ?1
                 ORDER BY created_at, rowid",
            )?;

            let rows = stmt
                .query_map([user_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Batch-set `read = true`. Idempotent: re-marking a read message is a
    /// no-op, so concurrent calls are safe without coordination.
    pub fn mark_messages_read(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE messages SET read = 1 WHERE id IN ({})",
                placeholders.join(", ")
            );

            let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
            conn.execute(&sql, params.as_slice())?;

            Ok(())
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, name, username, email, password, bio, profile_picture, created_at
         FROM users WHERE {column} = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], map_user).optional()?;

    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        password: row.get(4)?,
        bio: row.get(5)?,
        profile_picture: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        tags: row.get(5)?,
        company: row.get(6)?,
        location: row.get(7)?,
        job_link: row.get(8)?,
        document_name: row.get(9)?,
        document_url: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        author_name: row.get(13)?,
        author_username: row.get(14)?,
        author_profile_picture: row.get(15)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        content: row.get(3)?,
        read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn db_with_users(usernames: &[&str]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for (i, username) in usernames.iter().enumerate() {
            db.create_user(
                &format!("user-{username}"),
                &format!("User {username}"),
                username,
                &format!("{username}@example.edu"),
                "hash",
                "",
                &format!("2026-01-01T00:00:0{i}.000000Z"),
            )
            .unwrap();
        }
        db
    }

    #[test]
    fn create_and_lookup_user() {
        let db = db_with_users(&["ada"]);

        let by_email = db.get_user_by_email("ada@example.edu").unwrap().unwrap();
        assert_eq!(by_email.username, "ada");

        assert!(db.get_user_by_username("nobody").unwrap().is_none());
        assert!(db.user_exists("user-ada").unwrap());
        assert!(!db.user_exists("user-nobody").unwrap());
    }

    #[test]
    fn duplicate_username_insert_is_a_unique_violation() {
        let db = db_with_users(&["ada"]);

        let err = db
            .create_user(
                "user-ada2",
                "Ada Again",
                "ada",
                "ada2@example.edu",
                "hash",
                "",
                "2026-01-01T00:00:01.000000Z",
            )
            .unwrap_err();
        assert!(crate::is_unique_violation(&err));

        // Unrelated errors are not misclassified.
        assert!(!crate::is_unique_violation(&anyhow::anyhow!("disk full")));
    }

    #[test]
    fn uniqueness_checks_ignore_self() {
        let db = db_with_users(&["ada", "alan"]);

        assert!(!db.username_taken_by_other("ada", "user-ada").unwrap());
        assert!(db.username_taken_by_other("ada", "user-alan").unwrap());
        assert!(db.email_taken_by_other("ada@example.edu", "user-alan").unwrap());
    }

    #[test]
    fn search_users_excludes_caller() {
        let db = db_with_users(&["ada", "adam", "grace"]);

        let hits = db.search_users("ada", "user-adam", 10).unwrap();
        let names: Vec<&str> = hits.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["ada"]);
    }

    #[test]
    fn reset_tokens_expire_and_burn() {
        let db = db_with_users(&["ada"]);
        db.insert_password_reset("r1", "user-ada", "tok", "2026-01-01T01:00:00.000000Z")
            .unwrap();

        // Before expiry.
        let reset = db
            .get_active_reset("tok", "2026-01-01T00:30:00.000000Z")
            .unwrap()
            .expect("token should be active");
        assert_eq!(reset.user_id, "user-ada");

        // After expiry.
        assert!(
            db.get_active_reset("tok", "2026-01-01T02:00:00.000000Z")
                .unwrap()
                .is_none()
        );

        // Used tokens are dead even before expiry.
        db.mark_reset_used("r1").unwrap();
        assert!(
            db.get_active_reset("tok", "2026-01-01T00:30:00.000000Z")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn posts_filter_by_category_and_search() {
        let db = db_with_users(&["ada"]);
        db.insert_post(
            "p1", "user-ada", "note", "Calculus summary", "limits and derivatives",
            "[\"math\"]", None, None, None, None, None, "2026-01-01T10:00:00.000000Z",
        )
        .unwrap();
        db.insert_post(
            "p2", "user-ada", "job", "Intern opening", "backend role",
            "[]", Some("Initech"), Some("Remote"), None, None, None,
            "2026-01-01T11:00:00.000000Z",
        )
        .unwrap();

        let all = db.get_posts(0, 20, None, None).unwrap();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].id, "p2");

        let jobs = db.get_posts(0, 20, None, Some("job")).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, "job");

        let hits = db.get_posts(0, 20, Some("calculus"), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "p1");

        // Search matches the author's name too.
        let by_author = db.get_posts(0, 20, Some("User ada"), None).unwrap();
        assert_eq!(by_author.len(), 2);
    }

    #[test]
    fn replies_batch_fetch_and_touch_post() {
        let db = db_with_users(&["ada", "alan"]);
        db.insert_post(
            "p1", "user-ada", "thread", "Q", "anyone took CS101?",
            "[]", None, None, None, None, None, "2026-01-01T10:00:00.000000Z",
        )
        .unwrap();
        db.insert_reply("r1", "p1", "user-alan", "yes!", "2026-01-01T10:05:00.000000Z")
            .unwrap();

        let replies = db.get_replies_for_posts(&["p1".to_string()]).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].author_username, "alan");

        let post = &db.get_posts(0, 20, None, None).unwrap()[0];
        assert_eq!(post.updated_at, "2026-01-01T10:05:00.000000Z");

        assert!(db.get_replies_for_posts(&[]).unwrap().is_empty());
    }

    #[test]
    fn messages_between_is_bidirectional_and_ordered() {
        let db = db_with_users(&["ada", "alan", "grace"]);
        db.insert_message("m1", "user-ada", "user-alan", "hi", "2026-01-01T10:00:00.000000Z")
            .unwrap();
        db.insert_message("m2", "user-alan", "user-ada", "hey", "2026-01-01T10:01:00.000000Z")
            .unwrap();
        db.insert_message("m3", "user-ada", "user-grace", "other", "2026-01-01T10:02:00.000000Z")
            .unwrap();

        let thread = db.messages_between("user-ada", "user-alan").unwrap();
        let ids: Vec<&str> = thread.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);

        let all = db.messages_for_user("user-ada").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let db = db_with_users(&["ada", "alan"]);
        db.insert_message("m1", "user-ada", "user-alan", "hi", "2026-01-01T10:00:00.000000Z")
            .unwrap();

        let ids = vec!["m1".to_string()];
        db.mark_messages_read(&ids).unwrap();
        db.mark_messages_read(&ids).unwrap();
        db.mark_messages_read(&[]).unwrap();

        let thread = db.messages_between("user-ada", "user-alan").unwrap();
        assert!(thread[0].read);
    }
}
