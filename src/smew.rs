//! SMEW — message-thread reconstruction via Message-Id/In-Reply-To/References
//! (§4.6), plus the parent-id extraction rule applied when indexing a new
//! message.

use std::collections::{HashSet, VecDeque};

use regex::Regex;
use std::sync::LazyLock;

use crate::error::IndexError;
use crate::index::{ATTR_MESSAGE_ID, ATTR_PARID, ATTR_URI, MailIndex};

/// `<` + one-or-more of `{-A-Za-z0-9!#$%&'*+/=?^_`{|}~.@}` (ASCII only) + `>`.
static MSGID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<[-A-Za-z0-9!#$%&'*+/=?^_`{|}~.@]+>").expect("valid msgid regex")
});

/// Every `<...>` token in `field` that satisfies the valid-msgid grammar,
/// in order of appearance, including the surrounding angle brackets.
pub fn extract_msgids(field: &str) -> Vec<String> {
    MSGID_RE
        .find_iter(field)
        .filter(|m| m.as_str().is_ascii())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// §4.6 parent-id extraction precedence:
/// 1. `In-Reply-To` has exactly one valid msg-id → use it.
/// 2. Else `References` has >= 1 valid msg-id → use the LAST one.
/// 3. Else `In-Reply-To` has >= 2 valid msg-ids → use the FIRST one.
pub fn extract_parent_id(in_reply_to: &str, references: &str) -> Option<String> {
    let irt = extract_msgids(in_reply_to);
    if irt.len() == 1 {
        return Some(irt[0].clone());
    }
    let refs = extract_msgids(references);
    if let Some(last) = refs.last() {
        return Some(last.clone());
    }
    if irt.len() >= 2 {
        return Some(irt[0].clone());
    }
    None
}

struct ArchivedHit {
    message_id: String,
    uri: String,
    in_folder: bool,
}

/// §4.6 operation: ancestors-then-descendants traversal starting from
/// `msgid`, returning one URI per surviving doc, in the order they should be
/// emitted to the client (ancestors first, then the seed, then descendants).
pub fn smew(index: &dyn MailIndex, msgid: &str, folder_scope: Option<&str>) -> Result<Vec<String>, IndexError> {
    let mut ancestors: VecDeque<ArchivedHit> = VecDeque::new();

    // Step 1: walk up via x-mew-parid until no parent or no match.
    let mut cur = msgid.to_string();
    let mut i = 0usize;
    let mut seed: Option<ArchivedHit> = None;
    loop {
        let ids = index.search_by_attr(ATTR_MESSAGE_ID, &cur)?;
        let Some(id) = ids.into_iter().next() else { break };
        let doc = match index.get_doc(id)? {
            Some(d) => d,
            None => break,
        };
        let uri = doc.attr(ATTR_URI).unwrap_or_default().to_string();
        let in_folder = folder_scope.map(|f| uri.contains(f)).unwrap_or(false);
        let hit = ArchivedHit { message_id: cur.clone(), uri, in_folder };
        let parent = doc.attr(ATTR_PARID).map(|s| s.to_string());

        if i == 0 {
            seed = Some(hit);
        } else {
            ancestors.push_front(hit);
        }

        match parent {
            Some(p) if p != cur => {
                cur = p;
                i += 1;
            }
            _ => break,
        }
    }

    let Some(seed) = seed else { return Ok(Vec::new()) };
    let seed_message_id = seed.message_id.clone();
    ancestors.push_back(seed);

    // Step 2: BFS descendants via x-mew-parid == child.message_id.
    let mut working: VecDeque<String> = VecDeque::new();
    working.push_back(seed_message_id);
    let mut visited: HashSet<String> = HashSet::new();
    while let Some(parent_id) = working.pop_front() {
        let ids = index.search_by_attr(ATTR_PARID, &parent_id)?;
        for id in ids {
            let Some(doc) = index.get_doc(id)? else { continue };
            let Some(child_msgid) = doc.attr(ATTR_MESSAGE_ID).map(|s| s.to_string()) else { continue };
            if !visited.insert(child_msgid.clone()) {
                continue;
            }
            let uri = doc.attr(ATTR_URI).unwrap_or_default().to_string();
            let in_folder = folder_scope.map(|f| uri.contains(f)).unwrap_or(false);
            ancestors.push_back(ArchivedHit { message_id: child_msgid.clone(), uri, in_folder });
            working.push_back(child_msgid);
        }
    }

    Ok(dedup_keep_policy(ancestors, folder_scope.is_some()))
}

/// §4.6 step 3 and §9 open question: dedup by message-id. Preserve the
/// implementation's actual (not the source comment's claimed) behavior:
/// when a folder scope was requested, the NON-scoped duplicate is the one
/// removed; without a scope, "keep earlier encountered" wins.
fn dedup_keep_policy(hits: VecDeque<ArchivedHit>, has_scope: bool) -> Vec<String> {
    let mut kept: Vec<ArchivedHit> = Vec::new();
    for hit in hits {
        if let Some(existing_idx) = kept.iter().position(|k| k.message_id == hit.message_id) {
            if has_scope && hit.in_folder && !kept[existing_idx].in_folder {
                kept[existing_idx] = hit;
            }
            // otherwise keep the earlier-encountered entry already in `kept`.
        } else {
            kept.push(hit);
        }
    }
    kept.into_iter().map(|h| h.uri).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_in_reply_to_wins() {
        let parid = extract_parent_id("<a@x>", "<z1@x> <z2@x>");
        assert_eq!(parid.as_deref(), Some("<a@x>"));
    }

    #[test]
    fn multiple_references_uses_last() {
        let parid = extract_parent_id("", "<r1@x> <r2@x> <r3@x>");
        assert_eq!(parid.as_deref(), Some("<r3@x>"));
    }

    #[test]
    fn two_in_reply_to_with_no_references_uses_first() {
        let parid = extract_parent_id("<a@x> <b@x>", "");
        assert_eq!(parid.as_deref(), Some("<a@x>"));
    }

    #[test]
    fn invariant_parent_id_precedence() {
        // Property test from §8 invariant 7: exactly one In-Reply-To and ten
        // References still picks the In-Reply-To value.
        let refs: Vec<String> = (0..10).map(|i| format!("<r{i}@x>")).collect();
        let parid = extract_parent_id("<sole@x>", &refs.join(" "));
        assert_eq!(parid.as_deref(), Some("<sole@x>"));
    }

    #[test]
    fn no_valid_msgid_anywhere_yields_none() {
        assert!(extract_parent_id("not a msgid", "also not one").is_none());
    }
}
