//! Identity resolution for a run.

use crate::client::{Paginator, RateLimitedClient, RetryPolicy};
use crate::error::ResolutionError;
use crate::fetcher::shapes::{parse_item, MemberItem};
use crate::models::Identity;
use crate::source::Query;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Which identities a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub organization: String,
    /// Explicit member list. When set, the organization is not enumerated.
    pub members: Option<Vec<String>>,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.members {
            Some(ref members) => {
                write!(f, "{} ({} listed members)", self.organization, members.len())
            }
            None => write!(f, "{}", self.organization),
        }
    }
}

/// Enumerates the identities in scope.
pub struct IdentityResolver {
    client: Arc<RateLimitedClient>,
    page_size: u32,
    max_pages: u32,
    retry: RetryPolicy,
}

impl IdentityResolver {
    pub fn new(
        client: Arc<RateLimitedClient>,
        page_size: u32,
        max_pages: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            page_size,
            max_pages,
            retry,
        }
    }

    /// Deduplicated identities in lexicographic order.
    pub async fn resolve(&self, scope: &Scope) -> Result<Vec<Identity>, ResolutionError> {
        let handles: Vec<String> = match scope.members {
            Some(ref members) => members.clone(),
            None => self.enumerate(&scope.organization).await?,
        };

        let identities: BTreeSet<Identity> = handles
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .map(Identity::new)
            .collect();

        if identities.is_empty() {
            return Err(ResolutionError::Empty(scope.to_string()));
        }

        info!("Resolved {} identities in {}", identities.len(), scope);
        Ok(identities.into_iter().collect())
    }

    async fn enumerate(&self, organization: &str) -> Result<Vec<String>, ResolutionError> {
        let query = Query::new(format!("/orgs/{}/members", organization));
        let mut pager = Paginator::new(&self.client, query, self.page_size, self.max_pages);

        let items = self
            .retry
            .collect(&mut pager)
            .await
            .map_err(|source| ResolutionError::Source {
                scope: organization.to_string(),
                source,
            })?;

        if pager.truncated() {
            warn!("Member list of {} truncated at {} pages", organization, self.max_pages);
        }

        let mut logins = Vec::with_capacity(items.len());
        for item in items {
            match parse_item::<MemberItem>(item) {
                Ok(member) => logins.push(member.login),
                Err(e) => warn!("Skipping unrecognized member item: {}", e),
            }
        }
        Ok(logins)
    }
}
