/*!
Topic Orderer (C9). Reorders cluster groups by regex-indexed topic
priority over each group's central members (spec §4.9), grounded on
`original_source/client/articles/src/order-clusters.go`.
*/

use crate::types::{Article, Cluster, PipelineError, Topic};
use regex::Regex;
use tracing::error;

/// `topics.txt`: one topic per line, `name: kw1, kw2, kw3`, each keyword a
/// regex, `#` comments, blank lines ignored (spec §6). A malformed regex
/// is `ConfigInvalid` — fatal at load (spec §7).
pub fn load_topics(text: &str) -> Result<Vec<Topic>, PipelineError> {
    let mut topics = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, rest)) = line.split_once(':') else {
            return Err(PipelineError::ConfigInvalid(format!("topic line missing ':': {line}")));
        };
        let mut patterns = Vec::new();
        for kw in rest.split(',') {
            let kw = kw.trim();
            if kw.is_empty() {
                continue;
            }
            let pattern = format!("(?i){kw}");
            let re = Regex::new(&pattern)
                .map_err(|e| PipelineError::ConfigInvalid(format!("invalid topic regex '{kw}': {e}")))?;
            patterns.push(re);
        }
        topics.push(Topic { name: name.trim().to_string(), patterns });
    }
    Ok(topics)
}

/// Walk topics in file order; for each topic, move every still-unmatched
/// group whose central members contain at least one title matching any of
/// that topic's regexes to the output, in the order encountered. Groups
/// matching no topic keep their relative input order, appended last
/// (spec §4.9, testable property 7). On a load failure the caller already
/// has `ConfigInvalid`; this function assumes `topics` parsed successfully
/// and returns the input unchanged only if `topics` is empty.
pub fn order_groups(groups: Vec<Vec<Article>>, topics: &[Topic]) -> Vec<Vec<Article>> {
    if topics.is_empty() {
        return groups;
    }

    let mut remaining: Vec<Option<Vec<Article>>> = groups.into_iter().map(Some).collect();
    let mut ordered = Vec::new();

    for topic in topics {
        for slot in remaining.iter_mut() {
            let Some(group) = slot else { continue };
            let matches = group.iter().any(|article| {
                topic.patterns.iter().any(|re| re.is_match(&article.title))
            });
            if matches {
                ordered.push(slot.take().unwrap());
            }
        }
    }

    for slot in remaining.into_iter() {
        if let Some(group) = slot {
            ordered.push(group);
        }
    }

    ordered
}

pub fn load_topics_or_log(text: &str) -> Vec<Topic> {
    match load_topics(text) {
        Ok(topics) => topics,
        Err(e) => {
            error!(error = %e, "failed to load topics.txt, orderer will pass groups through unchanged");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(title: &str) -> Article {
        Article {
            id: 0,
            title: title.to_string(),
            link: format!("https://example/{title}"),
            date: Utc::now(),
            summary: String::new(),
            importance_bool: false,
            importance_reasoning: String::new(),
            created_at: Utc::now(),
            processed: false,
            relevant_per_human_check: None,
        }
    }

    #[test]
    fn parses_topics_txt_format() {
        let text = "# comment\nwar: nuclear, missile\n\nclimate: emissions\n";
        let topics = load_topics(text).unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "war");
        assert_eq!(topics[0].patterns.len(), 2);
    }

    #[test]
    fn invalid_regex_is_config_invalid() {
        let text = "bad: (unterminated";
        assert!(matches!(load_topics(text), Err(PipelineError::ConfigInvalid(_))));
    }

    #[test]
    fn orders_groups_by_topic_priority_and_preserves_unmatched_order() {
        let topics = load_topics("war: nuclear\n").unwrap();
        let group_a = vec![article("Economic outlook improves")];
        let group_b = vec![article("Nuclear test site reopens")];
        let group_c = vec![article("Weather forecast for the week")];

        let ordered = order_groups(vec![group_a.clone(), group_b.clone(), group_c.clone()], &topics);

        assert_eq!(ordered[0][0].title, "Nuclear test site reopens");
        assert_eq!(ordered[1][0].title, "Economic outlook improves");
        assert_eq!(ordered[2][0].title, "Weather forecast for the week");
    }

    #[test]
    fn no_group_is_emitted_twice_and_scenario_s5_orders_within_group() {
        let topics = load_topics("war: nuclear\n").unwrap();
        let group_abc = vec![article("A plain item"), article("B nuclear deal signed"), article("C outlier item")];
        let group_d = vec![article("D unrelated")];

        let ordered = order_groups(vec![group_abc.clone(), group_d.clone()], &topics);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].len(), 3);
        assert_eq!(ordered[0][0].title, "A plain item");
        assert_eq!(ordered[0][1].title, "B nuclear deal signed");
        assert_eq!(ordered[0][2].title, "C outlier item");
        assert_eq!(ordered[1][0].title, "D unrelated");
    }
}
