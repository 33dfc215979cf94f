//! Revision metadata returned by versioning backends.

use chrono::{DateTime, Utc};

/// One entry of a secret's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub body: String,
}

impl Revision {
    /// The synthetic single revision reported without versioning.
    pub fn latest() -> Self {
        Self {
            hash: "latest".to_string(),
            author: String::new(),
            email: String::new(),
            date: Utc::now(),
            subject: "latest".to_string(),
            body: String::new(),
        }
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = if self.hash.len() >= 8 {
            &self.hash[..8]
        } else {
            &self.hash
        };
        write!(f, "{} {} <{}> {}", short, self.author, self.email, self.subject)
    }
}
