//! In-process mail service.
//!
//! [`InMemoryMailbox`] keeps messages, labels and filters in memory and
//! evaluates the subset of the search grammar the pipeline emits: `from:`
//! OR-groups with `*` wildcards, bare words and `AROUND` matched against the
//! subject, parenthesised `OR` groups, and `after:` bounds (always satisfied).
//! Filters are applied to messages as they are delivered, like the real
//! service does.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MailService, MessageMetadata, ProviderError, Result, SearchPage};
use crate::domain::{
    parse_or_group, system_labels, FilterId, FilterSpec, LabelId, LabelMutation, MailFilter,
    MailLabel, MessageId, SearchQuery, Sender,
};

const MAX_BULK_MODIFY: usize = 1000;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailboxOp {
    Search,
    Metadata,
    ListLabels,
    CreateLabel,
    DeleteLabel,
    CreateFilter,
    ListFilters,
    DeleteFilter,
    BulkModify,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    from: String,
    subject: String,
    address: String,
    labels: BTreeSet<LabelId>,
}

impl StoredMessage {
    fn apply(&mut self, mutation: &LabelMutation) {
        for label in &mutation.add_labels {
            self.labels.insert(label.clone());
        }
        for label in &mutation.remove_labels {
            self.labels.remove(label);
        }
    }

    fn in_spam_or_trash(&self) -> bool {
        self.labels.contains(&system_labels::trash()) || self.labels.contains(&system_labels::spam())
    }
}

#[derive(Debug, Default)]
struct MailboxState {
    messages: Vec<StoredMessage>,
    labels: Vec<MailLabel>,
    filters: Vec<MailFilter>,
    next_id: u64,
    authorized: bool,
    failures: HashMap<MailboxOp, String>,
    search_log: Vec<(SearchQuery, Option<String>)>,
    metadata_calls: usize,
    modify_log: Vec<(Vec<MessageId>, LabelMutation)>,
}

impl MailboxState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn check(&self, op: MailboxOp) -> Result<()> {
        match self.failures.get(&op) {
            Some(message) => Err(ProviderError::Provider(message.clone())),
            None => Ok(()),
        }
    }
}

/// In-memory [`MailService`].
///
/// # Example
///
/// ```ignore
/// let mailbox = InMemoryMailbox::new();
/// let id = mailbox.deliver("\"MIT\" <admit@mit.edu>", "Apply now").await;
/// assert!(mailbox.labels_of(&id).await.unwrap().contains(&system_labels::inbox()));
/// ```
#[derive(Debug)]
pub struct InMemoryMailbox {
    state: RwLock<MailboxState>,
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMailbox {
    /// Creates an empty, authorized mailbox.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MailboxState {
                authorized: true,
                ..Default::default()
            }),
        }
    }

    /// Delivers a message to the inbox, unread, then runs the account's filters on it.
    pub async fn deliver(&self, from: &str, subject: &str) -> MessageId {
        self.deliver_with_labels(from, subject, &[system_labels::inbox(), system_labels::unread()])
            .await
    }

    /// Delivers a message carrying exactly the given labels, then runs filters on it.
    pub async fn deliver_with_labels(
        &self,
        from: &str,
        subject: &str,
        labels: &[LabelId],
    ) -> MessageId {
        let mut state = self.state.write().await;
        let id = MessageId::from(state.next_id("msg-"));
        let mut message = StoredMessage {
            id: id.clone(),
            from: from.to_string(),
            subject: subject.to_string(),
            address: Sender::from_header(from).address,
            labels: labels.iter().cloned().collect(),
        };

        for filter in &state.filters {
            let Some(from) = &filter.criteria.from else {
                continue;
            };
            if Condition::From(parse_or_group(from)).matches(&message) {
                message.apply(&filter.action);
            }
        }

        state.messages.push(message);
        id
    }

    /// Permanently deletes everything in the trash, as the service does after
    /// its retention period. Returns how many messages were removed.
    pub async fn expire_trashed(&self) -> usize {
        let mut state = self.state.write().await;
        let before = state.messages.len();
        let trash = system_labels::trash();
        state.messages.retain(|m| !m.labels.contains(&trash));
        before - state.messages.len()
    }

    /// Labels currently on a message.
    pub async fn labels_of(&self, id: &MessageId) -> Option<BTreeSet<LabelId>> {
        let state = self.state.read().await;
        state
            .messages
            .iter()
            .find(|m| &m.id == id)
            .map(|m| m.labels.clone())
    }

    /// Every message id with its labels, in delivery order.
    pub async fn snapshot(&self) -> Vec<(MessageId, BTreeSet<LabelId>)> {
        let state = self.state.read().await;
        state
            .messages
            .iter()
            .map(|m| (m.id.clone(), m.labels.clone()))
            .collect()
    }

    /// Makes every call of `op` fail with a provider error until cleared.
    pub async fn fail(&self, op: MailboxOp, message: impl Into<String>) {
        self.state.write().await.failures.insert(op, message.into());
    }

    /// Clears an injected failure.
    pub async fn clear_failure(&self, op: MailboxOp) {
        self.state.write().await.failures.remove(&op);
    }

    /// Simulates a revoked grant: [`MailService::verify_access`] fails.
    pub async fn revoke_access(&self) {
        self.state.write().await.authorized = false;
    }

    /// Every search request made so far, with its page token.
    pub async fn search_log(&self) -> Vec<(SearchQuery, Option<String>)> {
        self.state.read().await.search_log.clone()
    }

    /// Number of metadata fetches made so far.
    pub async fn metadata_calls(&self) -> usize {
        self.state.read().await.metadata_calls
    }

    /// Every bulk modification made so far.
    pub async fn modify_log(&self) -> Vec<(Vec<MessageId>, LabelMutation)> {
        self.state.read().await.modify_log.clone()
    }
}

#[async_trait]
impl MailService for InMemoryMailbox {
    async fn verify_access(&self) -> Result<()> {
        if self.state.read().await.authorized {
            Ok(())
        } else {
            Err(ProviderError::Authentication("access revoked".to_string()))
        }
    }

    async fn search_messages(
        &self,
        query: &SearchQuery,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage> {
        let mut state = self.state.write().await;
        state
            .search_log
            .push((query.clone(), page_token.map(str::to_string)));
        state.check(MailboxOp::Search)?;

        let condition = match &query.q {
            Some(q) => Condition::parse(q)?,
            None => Condition::All(Vec::new()),
        };
        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ProviderError::InvalidRequest(format!("bad page token {}", token)))?,
            None => 0,
        };

        let matching: Vec<MessageId> = state
            .messages
            .iter()
            .filter(|m| query.include_spam_trash || !m.in_spam_or_trash())
            .filter(|m| query.label_ids.iter().all(|l| m.labels.contains(l)))
            .filter(|m| condition.matches(m))
            .map(|m| m.id.clone())
            .collect();

        let page_size = page_size.clamp(1, 500) as usize;
        let end = (offset + page_size).min(matching.len());
        let ids = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(SearchPage {
            ids,
            next_page_token,
            result_size_estimate: matching.len() as u32,
        })
    }

    async fn get_message_metadata(
        &self,
        id: &MessageId,
        header_names: &[&str],
    ) -> Result<MessageMetadata> {
        let mut state = self.state.write().await;
        state.metadata_calls += 1;
        state.check(MailboxOp::Metadata)?;

        let message = state
            .messages
            .iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;

        let headers = header_names
            .iter()
            .filter_map(|name| {
                if name.eq_ignore_ascii_case("From") {
                    Some((name.to_string(), message.from.clone()))
                } else if name.eq_ignore_ascii_case("Subject") {
                    Some((name.to_string(), message.subject.clone()))
                } else {
                    None
                }
            })
            .collect();

        Ok(MessageMetadata {
            id: id.clone(),
            headers,
        })
    }

    async fn list_labels(&self) -> Result<Vec<MailLabel>> {
        let state = self.state.read().await;
        state.check(MailboxOp::ListLabels)?;
        Ok(state.labels.clone())
    }

    async fn create_label(&self, name: &str, _hidden: bool) -> Result<MailLabel> {
        let mut state = self.state.write().await;
        state.check(MailboxOp::CreateLabel)?;
        if state.labels.iter().any(|l| l.name == name) {
            return Err(ProviderError::InvalidRequest(format!(
                "label {} already exists",
                name
            )));
        }

        let label = MailLabel {
            id: LabelId::from(state.next_id("Label_")),
            name: name.to_string(),
        };
        state.labels.push(label.clone());
        Ok(label)
    }

    async fn delete_label(&self, id: &LabelId) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(MailboxOp::DeleteLabel)?;
        let index = state
            .labels
            .iter()
            .position(|l| &l.id == id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        state.labels.remove(index);
        for message in &mut state.messages {
            message.labels.remove(id);
        }
        Ok(())
    }

    async fn create_filter(&self, filter: &FilterSpec) -> Result<MailFilter> {
        let mut state = self.state.write().await;
        state.check(MailboxOp::CreateFilter)?;
        let created = MailFilter {
            id: FilterId::from(state.next_id("filter-")),
            criteria: filter.criteria.clone(),
            action: filter.action.clone(),
        };
        state.filters.push(created.clone());
        Ok(created)
    }

    async fn list_filters(&self) -> Result<Vec<MailFilter>> {
        let state = self.state.read().await;
        state.check(MailboxOp::ListFilters)?;
        Ok(state.filters.clone())
    }

    async fn delete_filter(&self, id: &FilterId) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(MailboxOp::DeleteFilter)?;
        let index = state
            .filters
            .iter()
            .position(|f| &f.id == id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        state.filters.remove(index);
        Ok(())
    }

    async fn bulk_modify(&self, ids: &[MessageId], mutation: &LabelMutation) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(MailboxOp::BulkModify)?;
        if ids.is_empty() || ids.len() > MAX_BULK_MODIFY {
            return Err(ProviderError::InvalidRequest(format!(
                "bulk modify takes 1 to {} ids, got {}",
                MAX_BULK_MODIFY,
                ids.len()
            )));
        }

        state.modify_log.push((ids.to_vec(), mutation.clone()));
        for message in state.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            message.apply(mutation);
        }
        Ok(())
    }
}

/// A parsed search expression.
#[derive(Debug, Clone, PartialEq)]
enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    From(Vec<String>),
    Word(String),
    Near(String, String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Word(String),
}

impl Condition {
    fn parse(q: &str) -> Result<Self> {
        let tokens = tokenize(q);
        let mut pos = 0;
        let condition = parse_sequence(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err(ProviderError::InvalidRequest(format!("unbalanced query: {}", q)));
        }
        Ok(condition)
    }

    fn matches(&self, message: &StoredMessage) -> bool {
        match self {
            Self::All(parts) => parts.iter().all(|c| c.matches(message)),
            Self::Any(parts) => parts.iter().any(|c| c.matches(message)),
            Self::From(patterns) => patterns
                .iter()
                .any(|p| sender_matches(&message.address, &p.to_lowercase())),
            Self::Word(word) => message.subject.to_lowercase().contains(word),
            Self::Near(a, b) => {
                let subject = message.subject.to_lowercase();
                subject.contains(a) && subject.contains(b)
            }
        }
    }
}

fn tokenize(q: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_braces = false;

    for c in q.chars() {
        match c {
            '{' => {
                in_braces = true;
                current.push(c);
            }
            '}' => {
                in_braces = false;
                current.push(c);
            }
            c if in_braces => current.push(c),
            '(' | ')' => {
                if !current.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                }
                tokens.push(if c == '(' { Token::Open } else { Token::Close });
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(Token::Word(current));
    }
    tokens
}

fn parse_sequence(tokens: &[Token], pos: &mut usize) -> Result<Condition> {
    let mut parts = Vec::new();
    while *pos < tokens.len() && tokens[*pos] != Token::Close {
        if let Some(part) = parse_alternatives(tokens, pos)? {
            parts.push(part);
        }
    }
    Ok(Condition::All(parts))
}

fn parse_alternatives(tokens: &[Token], pos: &mut usize) -> Result<Option<Condition>> {
    let Some(first) = parse_atom(tokens, pos)? else {
        return Ok(None);
    };
    let mut options = vec![first];
    while matches!(tokens.get(*pos), Some(Token::Word(w)) if w == "OR") {
        *pos += 1;
        if let Some(next) = parse_atom(tokens, pos)? {
            options.push(next);
        }
    }
    Ok(Some(if options.len() == 1 {
        options.remove(0)
    } else {
        Condition::Any(options)
    }))
}

/// Parses one atom. Date bounds parse to `None`.
fn parse_atom(tokens: &[Token], pos: &mut usize) -> Result<Option<Condition>> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| ProviderError::InvalidRequest("unexpected end of query".to_string()))?;
    *pos += 1;

    match token {
        Token::Open => {
            let inner = parse_sequence(tokens, pos)?;
            if tokens.get(*pos) != Some(&Token::Close) {
                return Err(ProviderError::InvalidRequest("missing )".to_string()));
            }
            *pos += 1;
            Ok(Some(inner))
        }
        Token::Close => Err(ProviderError::InvalidRequest("unexpected )".to_string())),
        Token::Word(word) => {
            if word == "after:" || word == "before:" {
                *pos += 1;
                return Ok(None);
            }
            if word.starts_with("after:") || word.starts_with("before:") {
                return Ok(None);
            }
            if let Some(senders) = word.strip_prefix("from:") {
                return Ok(Some(Condition::From(parse_or_group(senders))));
            }

            let word = word.to_lowercase();
            if matches!(tokens.get(*pos), Some(Token::Word(w)) if w == "AROUND") {
                *pos += 2;
                if let Some(Token::Word(other)) = tokens.get(*pos) {
                    *pos += 1;
                    return Ok(Some(Condition::Near(word, other.to_lowercase())));
                }
                return Err(ProviderError::InvalidRequest("AROUND needs two words".to_string()));
            }
            Ok(Some(Condition::Word(word)))
        }
    }
}

/// Full addresses match exactly, patterns with `*` match as globs, and bare
/// words match anywhere in the address.
fn sender_matches(address: &str, pattern: &str) -> bool {
    if pattern.contains('*') {
        glob_matches(pattern.as_bytes(), address.as_bytes())
    } else if pattern.contains('@') {
        address == pattern
    } else {
        address.contains(pattern)
    }
}

fn glob_matches(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_matches(rest, &text[skip..])),
        Some((c, rest)) => text.first() == Some(c) && glob_matches(rest, &text[1..]),
    }
}
