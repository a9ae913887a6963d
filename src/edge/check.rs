use serde::{Deserialize, Serialize};

use crate::edge::store::WarrantLookup;
use crate::edge::warrant::Warrant;
use crate::errors::EdgeError;

pub const OP_ANY_OF: &str = "anyOf";
pub const OP_ALL_OF: &str = "allOf";

pub const RESULT_AUTHORIZED: &str = "Authorized";
pub const RESULT_NOT_AUTHORIZED: &str = "Not Authorized";

/// Body of `POST /v2/check`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default)]
    pub warrants: Vec<Warrant>,
    /// Accepted for API compatibility; the edge always answers from its cache.
    #[serde(default)]
    pub consistent_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub code: u16,
    pub result: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    AnyOf,
    AllOf,
}

impl Combinator {
    /// An absent or empty `op` means no combinator.
    pub fn parse(op: Option<&str>) -> Result<Option<Self>, EdgeError> {
        match op {
            None | Some("") => Ok(None),
            Some(OP_ANY_OF) => Ok(Some(Combinator::AnyOf)),
            Some(OP_ALL_OF) => Ok(Some(Combinator::AllOf)),
            Some(_) => Err(EdgeError::InvalidParameter {
                parameter: "op",
                message: "must be one of anyOf or allOf",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Authorized,
    NotAuthorized,
}

impl Verdict {
    pub fn code(self) -> u16 {
        match self {
            Verdict::Authorized => 200,
            Verdict::NotAuthorized => 401,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Authorized => RESULT_AUTHORIZED,
            Verdict::NotAuthorized => RESULT_NOT_AUTHORIZED,
        }
    }
}

impl From<bool> for Verdict {
    fn from(granted: bool) -> Self {
        if granted {
            Verdict::Authorized
        } else {
            Verdict::NotAuthorized
        }
    }
}

impl From<Verdict> for CheckResponse {
    fn from(verdict: Verdict) -> Self {
        Self {
            code: verdict.code(),
            result: verdict.label().to_string(),
        }
    }
}

/// Answers a check against the cache, short-circuiting `anyOf` on the first
/// hit and `allOf` on the first miss. Refuses to answer while the cache is
/// not ready, or when a reload started while the lookups were running.
pub async fn evaluate<L: WarrantLookup>(
    store: &L,
    request: &CheckRequest,
) -> Result<Verdict, EdgeError> {
    let Some(token) = store.ready_token() else {
        return Err(EdgeError::CacheNotReady);
    };

    let combinator = Combinator::parse(request.op.as_deref())?;
    if request.warrants.is_empty() {
        return Err(EdgeError::MissingParameter("warrants"));
    }

    let verdict = match combinator {
        Some(Combinator::AnyOf) => any_of(store, &request.warrants).await?,
        Some(Combinator::AllOf) => all_of(store, &request.warrants).await?,
        None => {
            if request.warrants.len() > 1 {
                return Err(EdgeError::InvalidParameter {
                    parameter: "op",
                    message: "must include operator when including multiple warrants",
                });
            }
            Verdict::from(store.contains(&request.warrants[0].to_string()).await?)
        }
    };

    if store.ready_token() != Some(token) {
        return Err(EdgeError::CacheNotReady);
    }
    Ok(verdict)
}

async fn any_of<L: WarrantLookup>(store: &L, warrants: &[Warrant]) -> Result<Verdict, EdgeError> {
    for warrant in warrants {
        if store.contains(&warrant.to_string()).await? {
            return Ok(Verdict::Authorized);
        }
    }
    Ok(Verdict::NotAuthorized)
}

async fn all_of<L: WarrantLookup>(store: &L, warrants: &[Warrant]) -> Result<Verdict, EdgeError> {
    for warrant in warrants {
        if !store.contains(&warrant.to_string()).await? {
            return Ok(Verdict::NotAuthorized);
        }
    }
    Ok(Verdict::Authorized)
}
