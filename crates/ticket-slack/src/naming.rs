//! Subjects, channel names and issue keys.
//!
//! Slack channel names are lower-case, carry no spaces and are at most 80
//! characters. Issue keys are the channel id (channel-as-ticket) or
//! `<channel id>-<thread ts>` (thread-as-ticket).

use std::sync::OnceLock;

use regex::Regex;

pub const MAX_CHANNEL_NAME_LEN: usize = 80;

static NON_ALPHANUMERIC_RE: OnceLock<Regex> = OnceLock::new();
static CHANNEL_UNSAFE_RE: OnceLock<Regex> = OnceLock::new();

fn non_alphanumeric_re() -> &'static Regex {
    NON_ALPHANUMERIC_RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9 ]+").unwrap())
}

fn channel_unsafe_re() -> &'static Regex {
    CHANNEL_UNSAFE_RE.get_or_init(|| Regex::new(r#"[\s@#._/:\\*?"<>|]+"#).unwrap())
}

/// Last two path segments of a resource name with non-alphanumerics removed.
///
/// `//compute.googleapis.com/projects/p/zones/us-east1-b/instances/vm-1`
/// becomes `instancesvm1`.
pub fn resource_tail(target_resource: &str) -> String {
    let trimmed = target_resource.trim_end_matches('/');
    let tail = match trimmed.rfind('/') {
        Some(last) => match trimmed[..last].rfind('/') {
            Some(second) => &trimmed[second + 1..],
            None => trimmed,
        },
        None => trimmed,
    };
    non_alphanumeric_re().replace_all(tail, "").into_owned()
}

pub fn channel_ticket_subject(subtype: &str, target_resource: &str) -> String {
    format!("{subtype}-{}", resource_tail(target_resource))
}

pub fn thread_ticket_subject(project_name: &str, target_resource: &str, subtype: &str) -> String {
    format!("{project_name}-{}-{subtype}", resource_tail(target_resource))
}

/// Channel name for a channel-as-ticket subject.
pub fn channel_name_from_subject(subject: &str) -> String {
    let name: String = subject
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    name.chars().take(MAX_CHANNEL_NAME_LEN).collect()
}

/// Channel name for a routing contact (thread-as-ticket).
pub fn channel_name_from_contact(contact: &str) -> String {
    let lowered = contact.to_lowercase();
    let name = channel_unsafe_re().replace_all(&lowered, "-");
    name.chars().take(MAX_CHANNEL_NAME_LEN).collect()
}

pub fn thread_issue_key(channel_id: &str, thread_ts: &str) -> String {
    format!("{channel_id}-{thread_ts}")
}

/// Split an issue key into channel id and optional thread ts.
pub fn split_issue_key(issue_key: &str) -> (&str, Option<&str>) {
    match issue_key.split_once('-') {
        Some((channel, ts)) if !ts.is_empty() => (channel, Some(ts)),
        _ => (issue_key, None),
    }
}
