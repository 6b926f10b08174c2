//! REST client for the `room_members` table

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{MembershipError, MembershipStore};
use crate::bridge::AuthContext;
use crate::sync::{Role, RoomMembership};

/// Default connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Default request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const TABLE_PATH: &str = "/rest/v1/room_members";

#[derive(Debug, Deserialize)]
struct MemberRow {
    room_id: String,
    user_id: String,
    role: String,
    joined_at: DateTime<Utc>,
}

impl From<MemberRow> for RoomMembership {
    fn from(row: MemberRow) -> Self {
        Self {
            room_id: row.room_id,
            user_id: row.user_id,
            role: Role::parse(&row.role),
            joined_at: row.joined_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    role: String,
}

#[derive(Debug, Serialize)]
struct NewMember<'a> {
    room_id: &'a str,
    user_id: &'a str,
    role: &'static str,
}

#[derive(Debug, Serialize)]
struct RoleUpdate {
    role: &'static str,
}

/// Membership store backed by a PostgREST-style HTTP endpoint
#[derive(Debug, Clone)]
pub struct RestMembershipStore {
    http: Client,
    base_url: String,
    anon_key: String,
    access_token: String,
}

impl RestMembershipStore {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, MembershipError> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            access_token: access_token.into(),
        })
    }

    pub fn from_auth(auth: &AuthContext) -> Result<Self, MembershipError> {
        Self::new(&auth.realtime_endpoint, &auth.anon_key, &auth.access_token)
    }

    /// Build an authenticated request against the members table
    fn request(&self, method: Method, query: &[(&str, String)]) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, TABLE_PATH);
        self.http
            .request(method, &url)
            .query(query)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.access_token)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, MembershipError> {
        let resp = req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                warn!("Membership store unreachable: {}", e);
                MembershipError::NotReachable
            } else {
                MembershipError::Http(e)
            }
        })?;

        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MembershipError::Unauthorized),
            s => Err(MembershipError::Api(format!("Unexpected response (HTTP {})", s.as_u16()))),
        }
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl MembershipStore for RestMembershipStore {
    #[instrument(skip(self))]
    async fn members(&self, room_id: &str) -> Result<Vec<RoomMembership>, MembershipError> {
        let req = self.request(
            Method::GET,
            &[
                ("room_id", eq(room_id)),
                ("select", "*".to_string()),
                ("order", "joined_at.asc".to_string()),
            ],
        );
        let rows: Vec<MemberRow> = self.send(req).await?.json().await?;
        debug!("Read {} membership rows", rows.len());
        Ok(rows.into_iter().map(RoomMembership::from).collect())
    }

    #[instrument(skip(self))]
    async fn role_of(&self, room_id: &str, user_id: &str) -> Result<Option<Role>, MembershipError> {
        let req = self.request(
            Method::GET,
            &[
                ("room_id", eq(room_id)),
                ("user_id", eq(user_id)),
                ("select", "role".to_string()),
                ("limit", "1".to_string()),
            ],
        );
        let rows: Vec<RoleRow> = self.send(req).await?.json().await?;
        Ok(rows.first().map(|row| Role::parse(&row.role)))
    }

    #[instrument(skip(self))]
    async fn ensure_member(&self, room_id: &str, user_id: &str) -> Result<(), MembershipError> {
        let req = self
            .request(Method::POST, &[])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&NewMember {
                room_id,
                user_id,
                role: Role::Viewer.as_str(),
            });
        self.send(req).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_role(&self, room_id: &str, user_id: &str, role: Role) -> Result<(), MembershipError> {
        let req = self
            .request(Method::PATCH, &[("room_id", eq(room_id)), ("user_id", eq(user_id))])
            .json(&RoleUpdate { role: role.as_str() });
        self.send(req).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn demote_hosts(&self, room_id: &str) -> Result<(), MembershipError> {
        let req = self
            .request(
                Method::PATCH,
                &[("room_id", eq(room_id)), ("role", eq(Role::Host.as_str()))],
            )
            .json(&RoleUpdate {
                role: Role::Viewer.as_str(),
            });
        self.send(req).await?;
        Ok(())
    }
}
