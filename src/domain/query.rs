//! Search query grammar and pagination lanes.
//!
//! Queries use the mail service's search syntax: `{a b c}` is an OR-group,
//! `from:` restricts the sender, `after:` bounds the date and `AROUND n` is a
//! keyword proximity operator.

use serde::{Deserialize, Serialize};

use super::{LabelId, MessageId};

/// Date bound that makes a query span the whole mailbox history.
pub const UNBOUNDED_HISTORY: &str = "after: 1970/01/01";

/// Sender wildcard for every `.edu` address.
pub const EDU_WILDCARD: &str = "*@*.edu";

/// Words that make a sender address look institutional.
pub const INSTITUTIONAL_WORDS: [&str; 5] =
    ["college", "university", "admission", "admissions", "school"];

/// Subscription and preference wording typical of bulk admissions mail.
pub const SUBSCRIPTION_TERMS: &str = "(unsubscribe OR subscribe OR subscription \
     OR (update AROUND 5 preferences) OR (change AROUND 5 preferences) \
     OR (email AROUND 5 preferences) OR (update AROUND 5 email))";

/// One search request: a query string, optional label restriction and whether
/// trash and spam are searched too.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Search expression, if any.
    pub q: Option<String>,
    /// Only messages carrying all of these labels.
    pub label_ids: Vec<LabelId>,
    /// Include trash and spam folders.
    pub include_spam_trash: bool,
}

impl SearchQuery {
    /// A query expression searched outside trash and spam.
    pub fn text(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Default::default()
        }
    }

    /// Every message carrying a label, in every folder.
    pub fn labelled(label: LabelId) -> Self {
        Self {
            q: None,
            label_ids: vec![label],
            include_spam_trash: true,
        }
    }

    /// Extends the search to trash and spam.
    pub fn in_all_folders(mut self) -> Self {
        self.include_spam_trash = true;
        self
    }
}

/// One independently paginated search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryLane {
    /// Name used in logs and to pick lanes back out of the results.
    pub name: String,
    /// What the lane searches for.
    pub query: SearchQuery,
    /// Cursor for the next page, if any.
    pub page_token: Option<String>,
    /// Set once the lane has no more pages.
    pub exhausted: bool,
    /// Identifiers collected so far.
    pub collected_ids: Vec<MessageId>,
}

impl QueryLane {
    /// Creates a fresh lane positioned at the first page.
    pub fn new(name: impl Into<String>, query: SearchQuery) -> Self {
        Self {
            name: name.into(),
            query,
            page_token: None,
            exhausted: false,
            collected_ids: Vec::new(),
        }
    }

    /// Whether the lane still needs to be queried.
    pub fn is_active(&self) -> bool {
        !self.exhausted
    }
}

/// Joins terms into an OR-group: `{a b c}`.
pub fn or_group<S: AsRef<str>>(terms: &[S]) -> String {
    let joined = terms
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<&str>>()
        .join(" ");
    format!("{{{}}}", joined)
}

/// Splits an OR-group back into its terms. Braces are optional.
pub fn parse_or_group(expression: &str) -> Vec<String> {
    let trimmed = expression.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);
    inner.split_whitespace().map(str::to_string).collect()
}

/// The sender term shared by both discovery lanes: every `.edu` address plus
/// the extra addresses or domains given.
pub fn known_sender_term<S: AsRef<str>>(extra: &[S]) -> String {
    let mut terms = vec![EDU_WILDCARD];
    terms.extend(extra.iter().map(|t| t.as_ref()));
    format!("from:{}", or_group(&terms))
}

/// Query for mail from senders already known to be college mailers.
pub fn known_sender_query(known_term: &str) -> String {
    format!("{} {}", UNBOUNDED_HISTORY, known_term)
}

/// Query for subscription-style mail from institutional-looking senders.
pub fn potential_sender_query(known_term: &str) -> String {
    format!(
        "{} {} (from:{} OR {})",
        UNBOUNDED_HISTORY,
        SUBSCRIPTION_TERMS,
        or_group(&INSTITUTIONAL_WORDS),
        known_term
    )
}

/// Query for all mail ever received from a set of addresses.
pub fn sender_history_query<S: AsRef<str>>(addresses: &[S]) -> String {
    format!("{} from:{}", UNBOUNDED_HISTORY, or_group(addresses))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_group_wraps_terms_in_braces() {
        assert_eq!(or_group(&["a@x.edu", "b@y.edu"]), "{a@x.edu b@y.edu}");
        assert_eq!(or_group::<&str>(&[]), "{}");
    }

    #[test]
    fn parse_or_group_inverts_or_group() {
        let terms = vec!["a@x.edu".to_string(), "b@y.edu".to_string()];
        assert_eq!(parse_or_group(&or_group(&terms)), terms);
        assert_eq!(parse_or_group("single@x.edu"), vec!["single@x.edu"]);
        assert!(parse_or_group("{}").is_empty());
    }

    #[test]
    fn known_query_includes_edu_wildcard_and_extras() {
        let term = known_sender_term(&["info@collegeboard.org"]);
        assert_eq!(term, "from:{*@*.edu info@collegeboard.org}");
        assert_eq!(
            known_sender_query(&term),
            "after: 1970/01/01 from:{*@*.edu info@collegeboard.org}"
        );
    }

    #[test]
    fn potential_query_combines_keywords_and_senders() {
        let term = known_sender_term::<&str>(&[]);
        let query = potential_sender_query(&term);

        assert!(query.starts_with("after: 1970/01/01 (unsubscribe OR subscribe"));
        assert!(query.contains("(update AROUND 5 preferences)"));
        assert!(query
            .ends_with("(from:{college university admission admissions school} OR from:{*@*.edu})"));
    }

    #[test]
    fn sender_history_query_format() {
        assert_eq!(
            sender_history_query(&["a@x.edu", "b@y.edu"]),
            "after: 1970/01/01 from:{a@x.edu b@y.edu}"
        );
    }

    #[test]
    fn labelled_query_searches_all_folders() {
        let query = SearchQuery::labelled(LabelId::from("Label_9"));
        assert!(query.q.is_none());
        assert!(query.include_spam_trash);
        assert_eq!(query.label_ids, vec![LabelId::from("Label_9")]);
    }

    #[test]
    fn new_lane_is_active() {
        let lane = QueryLane::new("knownPass", SearchQuery::text("from:x"));
        assert!(lane.is_active());
        assert!(lane.page_token.is_none());
        assert!(lane.collected_ids.is_empty());
    }
}
