use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(StreamId);
id_newtype!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NarrowOperator {
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "stream")]
    Stream,
    #[serde(rename = "topic")]
    Topic,
    #[serde(rename = "sender")]
    Sender,
    #[serde(rename = "pm-with")]
    PmWith,
    #[serde(rename = "search")]
    Search,
}

impl NarrowOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Is => "is",
            Self::Stream => "stream",
            Self::Topic => "topic",
            Self::Sender => "sender",
            Self::PmWith => "pm-with",
            Self::Search => "search",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NarrowClause {
    pub operator: NarrowOperator,
    pub operand: String,
}

impl NarrowClause {
    pub fn new(operator: NarrowOperator, operand: impl Into<String>) -> Self {
        Self {
            operator,
            operand: operand.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NarrowError {
    #[error("a pm-with clause cannot be combined with stream or topic clauses")]
    ConversationConflict,
    #[error("empty operand for {0} clause")]
    EmptyOperand(&'static str),
}

/// Ordered filter describing which messages a view shows.
///
/// Equality is element-wise over the clause sequence; the feed controller
/// relies on it to decide whether a context reset is needed. The empty
/// narrow means "all messages".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Narrow(Vec<NarrowClause>);

impl Narrow {
    pub fn new(clauses: Vec<NarrowClause>) -> Result<Self, NarrowError> {
        let has_direct = clauses
            .iter()
            .any(|clause| clause.operator == NarrowOperator::PmWith);
        let has_stream = clauses.iter().any(|clause| {
            matches!(
                clause.operator,
                NarrowOperator::Stream | NarrowOperator::Topic
            )
        });
        if has_direct && has_stream {
            return Err(NarrowError::ConversationConflict);
        }
        if let Some(clause) = clauses
            .iter()
            .find(|clause| clause.operand.trim().is_empty())
        {
            return Err(NarrowError::EmptyOperand(clause.operator.as_str()));
        }
        Ok(Self(clauses))
    }

    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn stream(name: impl Into<String>) -> Self {
        Self(vec![NarrowClause::new(NarrowOperator::Stream, name)])
    }

    pub fn topic(stream: impl Into<String>, topic: impl Into<String>) -> Self {
        Self(vec![
            NarrowClause::new(NarrowOperator::Stream, stream),
            NarrowClause::new(NarrowOperator::Topic, topic),
        ])
    }

    /// Direct-message conversation with one or more partners.
    pub fn direct<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let operand = emails
            .into_iter()
            .map(|email| email.as_ref().trim().to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self(vec![NarrowClause::new(NarrowOperator::PmWith, operand)])
    }

    pub fn private_messages() -> Self {
        Self(vec![NarrowClause::new(NarrowOperator::Is, "private")])
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self(vec![NarrowClause::new(NarrowOperator::Search, query)])
    }

    /// Adds a clause, keeping the stream/direct exclusivity intact.
    pub fn with(mut self, clause: NarrowClause) -> Result<Self, NarrowError> {
        self.0.push(clause);
        Self::new(self.0)
    }

    pub fn clauses(&self) -> &[NarrowClause] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn operand(&self, operator: NarrowOperator) -> Option<&str> {
        self.0
            .iter()
            .find(|clause| clause.operator == operator)
            .map(|clause| clause.operand.as_str())
    }

    /// JSON form used by the `narrow` query parameter.
    pub fn to_query_value(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}

impl<'de> Deserialize<'de> for Narrow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let clauses = Vec::<NarrowClause>::deserialize(deserializer)?;
        Narrow::new(clauses).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Narrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("all");
        }
        let rendered = self
            .0
            .iter()
            .map(|clause| format!("{}:{}", clause.operator.as_str(), clause.operand))
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&rendered)
    }
}
