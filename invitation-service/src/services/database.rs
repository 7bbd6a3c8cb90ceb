//! PostgreSQL repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::ability::{InstitutionScope, TemplateScope};
use super::quota::{pair_lock_key, InvitationQuota};
use super::repository::{
    DirectoryRepository, EventCursor, EventFilter, InsertOutcome, InvitationRepository,
    Repositories, SecurityEventRepository, TemplateRepository,
};
use crate::models::{
    Institution, InstitutionGrant, Invitation, SecurityEvent, SecurityEventType, Submission,
    Template, User,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Append the WHERE clause for an event filter to `qb`.
fn push_event_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    qb.push(" WHERE TRUE");
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(event_type) = filter.event_type {
        qb.push(" AND event_type = ").push_bind(event_type.as_str());
    }
    if let Some(from) = filter.from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
    if let Some(audience) = &filter.audience {
        let ids: Vec<String> = audience
            .institution_ids
            .iter()
            .map(|id| id.to_string())
            .collect();
        qb.push(" AND (user_id = ").push_bind(audience.user_id);
        qb.push(" OR details->>'institution_id' = ANY(")
            .push_bind(ids.clone())
            .push(")");
        qb.push(" OR details->>'attempted_institution_id' = ANY(")
            .push_bind(ids)
            .push(")");
        if audience.include_unattributed {
            qb.push(
                " OR (details->>'institution_id' IS NULL AND details->>'attempted_institution_id' IS NULL)",
            );
        }
        qb.push(")");
    }
}

#[async_trait]
impl InvitationRepository for Database {
    async fn insert_within_quota(
        &self,
        invitation: &Invitation,
        quota: InvitationQuota,
    ) -> Result<InsertOutcome, anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent creations for the same pair until commit.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(pair_lock_key(&invitation.email, invitation.institution_id))
            .execute(&mut *tx)
            .await?;

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM invitations
            WHERE institution_id = $1 AND LOWER(email) = LOWER($2)
              AND used_at IS NULL AND expires_at > $3
            "#,
        )
        .bind(invitation.institution_id)
        .bind(&invitation.email)
        .bind(invitation.sent_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Err(limit) = quota.check(active) {
            tx.rollback().await?;
            return Ok(InsertOutcome::LimitReached(limit));
        }

        let inserted = sqlx::query_as::<_, Invitation>(
            r#"
            INSERT INTO invitations
                (id, institution_id, email, role, hashed_token, token_preview, sent_at, expires_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(invitation.id)
        .bind(invitation.institution_id)
        .bind(&invitation.email)
        .bind(invitation.role.as_str())
        .bind(&invitation.hashed_token)
        .bind(&invitation.token_preview)
        .bind(invitation.sent_at)
        .bind(invitation.expires_at)
        .bind(invitation.created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(inserted))
    }

    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>, anyhow::Error> {
        Ok(
            sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_by_hash(&self, hashed_token: &str) -> Result<Option<Invitation>, anyhow::Error> {
        Ok(
            sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE hashed_token = $1")
                .bind(hashed_token)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_active_by_preview(
        &self,
        preview: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        Ok(sqlx::query_as::<_, Invitation>(
            r#"
            SELECT * FROM invitations
            WHERE token_preview = $1 AND used_at IS NULL AND expires_at > $2
            ORDER BY sent_at DESC
            LIMIT 1
            "#,
        )
        .bind(preview)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn accept(
        &self,
        hashed_token: &str,
        email: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        // Row lock from the conditional update makes a concurrent second
        // acceptance see used_at set and match nothing.
        let consumed = sqlx::query_as::<_, Invitation>(
            r#"
            UPDATE invitations SET used_at = $4
            WHERE hashed_token = $1 AND LOWER(email) = LOWER($2)
              AND used_at IS NULL AND expires_at > $3
            RETURNING *
            "#,
        )
        .bind(hashed_token)
        .bind(email)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(invitation) = consumed else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO institution_roles (user_id, institution_id, role, granted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, institution_id, role) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(invitation.institution_id)
        .bind(invitation.role.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(invitation))
    }

    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE invitations SET used_at = $2, revoked_at = $2
            WHERE id = $1 AND used_at IS NULL AND expires_at > $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_institution(
        &self,
        institution_id: Uuid,
        include_used: bool,
    ) -> Result<Vec<Invitation>, anyhow::Error> {
        Ok(sqlx::query_as::<_, Invitation>(
            r#"
            SELECT * FROM invitations
            WHERE institution_id = $1 AND ($2 OR used_at IS NULL)
            ORDER BY sent_at DESC
            "#,
        )
        .bind(institution_id)
        .bind(include_used)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count_active(
        &self,
        email: &str,
        institution_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, anyhow::Error> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM invitations
            WHERE institution_id = $1 AND LOWER(email) = LOWER($2)
              AND used_at IS NULL AND expires_at > $3
            "#,
        )
        .bind(institution_id)
        .bind(email)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }
}

#[async_trait]
impl DirectoryRepository for Database {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, anyhow::Error> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_institution(&self, id: Uuid) -> Result<Option<Institution>, anyhow::Error> {
        Ok(
            sqlx::query_as::<_, Institution>("SELECT * FROM institutions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_institution_in_scope(
        &self,
        id: Uuid,
        scope: &InstitutionScope,
    ) -> Result<Option<Institution>, anyhow::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM institutions WHERE id = ");
        qb.push_bind(id).push(" AND ");
        scope.push_sql(&mut qb);

        Ok(qb
            .build_query_as::<Institution>()
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn grants_for_user(&self, user_id: Uuid) -> Result<Vec<InstitutionGrant>, anyhow::Error> {
        Ok(sqlx::query_as::<_, InstitutionGrant>(
            "SELECT * FROM institution_roles WHERE user_id = $1 ORDER BY granted_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn super_admin_institution_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, anyhow::Error> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM institutions WHERE super_admin_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl TemplateRepository for Database {
    async fn list_templates(
        &self,
        scope: &TemplateScope,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Template>, anyhow::Error> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM templates WHERE ");
        scope.push_sql(&mut qb);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        Ok(qb
            .build_query_as::<Template>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_template(&self, id: Uuid) -> Result<Option<Template>, anyhow::Error> {
        Ok(
            sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_submission(&self, id: Uuid) -> Result<Option<Submission>, anyhow::Error> {
        Ok(
            sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

#[async_trait]
impl SecurityEventRepository for Database {
    async fn append_event(&self, event: &SecurityEvent) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO security_events (id, event_type, user_id, ip_address, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.event_type.as_str())
        .bind(event.user_id)
        .bind(&event.ip_address)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_events(
        &self,
        filter: &EventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SecurityEvent>, i64), anyhow::Error> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM security_events");
        push_event_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM security_events");
        push_event_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let events = qb
            .build_query_as::<SecurityEvent>()
            .fetch_all(&self.pool)
            .await?;

        Ok((events, total))
    }

    async fn events_after(
        &self,
        filter: &EventFilter,
        cursor: Option<EventCursor>,
        batch: i64,
    ) -> Result<Vec<SecurityEvent>, anyhow::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM security_events");
        push_event_filter(&mut qb, filter);
        if let Some(cursor) = cursor {
            qb.push(" AND (created_at, id) < (")
                .push_bind(cursor.created_at)
                .push(", ")
                .push_bind(cursor.id)
                .push(")");
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(batch);

        Ok(qb
            .build_query_as::<SecurityEvent>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn count_by_type(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<(SecurityEventType, i64)>, anyhow::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT event_type, COUNT(*) FROM security_events");
        push_event_filter(&mut qb, filter);
        qb.push(" GROUP BY event_type ORDER BY event_type");

        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .filter_map(|(event_type, count)| match event_type.parse() {
                Ok(t) => Some((t, count)),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unknown security event type");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl Repositories for Database {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        crate::db::health_check(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            anyhow::anyhow!("Database health check failed: {}", e)
        })
    }
}
