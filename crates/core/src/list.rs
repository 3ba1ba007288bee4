//! Cursor-based list pages in the OpenAI list shape

use serde::{Deserialize, Serialize};

use crate::store::Entity;
use crate::{Error, Result};

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
    Asc,
    #[default]
    Desc,
}

/// Query for one page of an ordered collection
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub order: ListOrder,
    /// Id of the last item of the previous page
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn new(order: ListOrder) -> Self {
        Self {
            order,
            after: None,
            limit: None,
        }
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    /// Select the window of `ids` (given in creation order) this query asks for
    pub fn window<'a>(&self, ids: &'a [String]) -> Result<(Vec<&'a String>, bool)> {
        let ordered: Vec<&String> = match self.order {
            ListOrder::Asc => ids.iter().collect(),
            ListOrder::Desc => ids.iter().rev().collect(),
        };

        let start = match &self.after {
            Some(after) => {
                ordered
                    .iter()
                    .position(|id| *id == after)
                    .ok_or_else(|| Error::InvalidInput(format!("Unknown cursor '{}'", after)))?
                    + 1
            }
            None => 0,
        };
        let end = (start + self.effective_limit()).min(ordered.len());
        let has_more = end < ordered.len();

        Ok((ordered[start..end].to_vec(), has_more))
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
    pub has_more: bool,
}

impl<T: Entity> Page<T> {
    pub fn new(data: Vec<T>, has_more: bool) -> Self {
        Self {
            first_id: data.first().map(|item| item.id().to_string()),
            last_id: data.last().map(|item| item.id().to_string()),
            data,
            has_more,
        }
    }
}
