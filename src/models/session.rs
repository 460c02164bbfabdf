use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::models::query::Values;
use crate::models::user::ADMIN_ROLE;

/// An authenticated session, as carried by a cookie or a bearer token.
///
/// In a cookie the fields travel as the query parameters `adm`, `exp`,
/// `name` and `uid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub is_admin: bool,
    pub real_name: String,
    /// Unix seconds.
    pub expires: i64,
}

impl Session {
    /// A session for `username` that expires `duration` from now.
    pub fn new(username: &str, real_name: &str, roles: &[String], duration: Duration) -> Self {
        Self {
            username: username.to_string(),
            is_admin: roles.iter().any(|r| r == ADMIN_ROLE),
            real_name: real_name.to_string(),
            expires: Utc::now().timestamp() + duration.as_secs() as i64,
        }
    }

    /// `adm=<bool>&exp=<unix>[&name=<real name>]&uid=<username>`
    pub fn to_query_string(&self) -> String {
        let mut v = Values::new();
        v.set("adm", self.is_admin.to_string());
        v.set("exp", self.expires.to_string());
        if !self.real_name.is_empty() {
            v.set("name", self.real_name.as_str());
        }
        v.set("uid", self.username.as_str());
        v.encode()
    }

    /// Parses whatever fields are present. `adm` is true only for the exact
    /// string `true`; an unparseable `exp` is left at zero.
    pub fn from_query_string(qs: &str) -> Self {
        let v = Values::parse(qs);
        Self {
            username: v.get("uid").unwrap_or_default().to_string(),
            is_admin: v.get("adm") == Some("true"),
            real_name: v.get("name").unwrap_or_default().to_string(),
            expires: v.get("exp").and_then(|e| e.parse().ok()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_layout() {
        let s = Session {
            username: "bob".to_string(),
            is_admin: true,
            real_name: "Bob Builder".to_string(),
            expires: 1700000000,
        };
        assert_eq!(s.to_query_string(), "adm=true&exp=1700000000&name=Bob+Builder&uid=bob");
        assert_eq!(Session::from_query_string(&s.to_query_string()), s);
    }

    #[test]
    fn empty_name_is_omitted() {
        let s = Session {
            username: "eve@example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(s.to_query_string(), "adm=false&exp=0&uid=eve%40example.com");
    }

    #[test]
    fn parse_is_lenient() {
        let s = Session::from_query_string("uid=mallory&adm=TRUE&exp=soon&extra=1");
        assert_eq!(s.username, "mallory");
        assert!(!s.is_admin);
        assert_eq!(s.expires, 0);

        let s = Session::from_query_string("adm=true&adm=false&uid=a&uid=b");
        assert!(s.is_admin);
        assert_eq!(s.username, "a");
    }

    #[test]
    fn admin_role_sets_flag() {
        let roles = vec!["user".to_string(), "admin".to_string()];
        let s = Session::new("root", "", &roles, Duration::from_secs(60));
        assert!(s.is_admin);
        assert!(s.expires > Utc::now().timestamp());
        assert!(!Session::new("u", "", &[], Duration::from_secs(60)).is_admin);
    }
}
