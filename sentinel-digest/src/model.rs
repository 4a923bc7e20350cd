//! Digest data model, stable text format, and trimming

use once_cell::sync::Lazy;
use regex::Regex;
use sentinel_core::TokenCounter;
use serde::{Deserialize, Serialize};

/// Current on-disk schema version.
pub const DIGEST_SCHEMA_VERSION: u32 = 1;

pub const HEADING_HINGES: &str = "## Hinge Index";
pub const HEADING_STANDINGS: &str = "## Standing Reasons";
pub const HEADING_ANCHORS: &str = "## NPC Memory Anchors";
pub const HEADING_THREADS: &str = "## Open Threads";

static SCHEMA_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^digest-schema:\s*(\d+)\s*$").unwrap());
static HINGE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^- \[([^\]]+)\]\s*(.*)$").unwrap());
static STANDING_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^- ([^:]+):\s*(.*)$").unwrap());
static THREAD_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^- (.*?)\s*\(trigger:\s*(.*)\)\s*$").unwrap());
static COMPRESS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\((\d+) earlier anchors compressed\)$").unwrap());

/// Marker line standing in for anchors folded away by trimming.
pub fn compress_marker(count: usize) -> String {
    format!("({} earlier anchors compressed)", count)
}

fn parse_compress_marker(line: &str) -> Option<usize> {
    COMPRESS_LINE
        .captures(line)
        .and_then(|c| c[1].parse().ok())
}

// ============================================================================
// ENTRIES
// ============================================================================

/// One hinge: situation, choice, and consequence compressed to a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HingeEntry {
    pub id: String,
    pub summary: String,
}

/// Why a faction stands where it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingEntry {
    pub faction: String,
    pub reason: String,
}

/// A dormant plot thread and what wakes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub name: String,
    pub trigger: String,
}

// ============================================================================
// DIGEST
// ============================================================================

/// Structured compressed memory with four fixed sub-sections.
///
/// Unknown trailing sections survive a parse/render round trip so newer
/// writers do not lose data under older readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub schema_version: u32,
    pub hinges: Vec<HingeEntry>,
    pub standings: Vec<StandingEntry>,
    pub anchors: Vec<String>,
    pub threads: Vec<ThreadEntry>,
    /// Unknown later sections, preserved verbatim as (heading, lines)
    pub trailing: Vec<(String, Vec<String>)>,
}

impl Default for Digest {
    fn default() -> Self {
        Self {
            schema_version: DIGEST_SCHEMA_VERSION,
            hinges: Vec::new(),
            standings: Vec::new(),
            anchors: Vec::new(),
            threads: Vec::new(),
            trailing: Vec::new(),
        }
    }
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.hinges.is_empty()
            && self.standings.is_empty()
            && self.anchors.is_empty()
            && self.threads.is_empty()
            && self.trailing.is_empty()
    }

    /// Whether the hinge index covers the given id.
    pub fn covers_hinge(&self, id: &str) -> bool {
        self.hinges.iter().any(|h| h.id == id)
    }

    /// Parse the stable text format. Tolerant: a missing heading yields
    /// an empty sub-section, unknown headings land in `trailing`, and a
    /// missing schema line reads as version 1.
    pub fn parse(text: &str) -> Self {
        let mut digest = Self::default();
        let mut current: Option<&str> = None;
        let mut trailing_current: Option<usize> = None;

        for line in text.lines() {
            let line = line.trim_end();
            if let Some(caps) = SCHEMA_LINE.captures(line) {
                if let Ok(version) = caps[1].parse() {
                    digest.schema_version = version;
                }
                continue;
            }
            if let Some(heading) = line.strip_prefix("## ") {
                match format!("## {}", heading).as_str() {
                    HEADING_HINGES => current = Some(HEADING_HINGES),
                    HEADING_STANDINGS => current = Some(HEADING_STANDINGS),
                    HEADING_ANCHORS => current = Some(HEADING_ANCHORS),
                    HEADING_THREADS => current = Some(HEADING_THREADS),
                    _ => {
                        digest
                            .trailing
                            .push((heading.to_string(), Vec::new()));
                        trailing_current = Some(digest.trailing.len() - 1);
                        current = None;
                        continue;
                    }
                }
                trailing_current = None;
                continue;
            }
            if line.is_empty() {
                continue;
            }
            match current {
                Some(HEADING_HINGES) => {
                    if let Some(caps) = HINGE_LINE.captures(line) {
                        digest.hinges.push(HingeEntry {
                            id: caps[1].to_string(),
                            summary: caps[2].to_string(),
                        });
                    }
                }
                Some(HEADING_STANDINGS) => {
                    if let Some(caps) = STANDING_LINE.captures(line) {
                        digest.standings.push(StandingEntry {
                            faction: caps[1].trim().to_string(),
                            reason: caps[2].to_string(),
                        });
                    }
                }
                Some(HEADING_ANCHORS) => {
                    if let Some(anchor) = line.strip_prefix("- ") {
                        digest.anchors.push(anchor.to_string());
                    } else if parse_compress_marker(line).is_some() {
                        digest.anchors.push(line.to_string());
                    }
                }
                Some(HEADING_THREADS) => {
                    if let Some(caps) = THREAD_LINE.captures(line) {
                        digest.threads.push(ThreadEntry {
                            name: caps[1].to_string(),
                            trigger: caps[2].to_string(),
                        });
                    } else if let Some(name) = line.strip_prefix("- ") {
                        digest.threads.push(ThreadEntry {
                            name: name.to_string(),
                            trigger: String::new(),
                        });
                    }
                }
                _ => {
                    if let Some(idx) = trailing_current {
                        digest.trailing[idx].1.push(line.to_string());
                    }
                }
            }
        }

        digest
    }

    /// Render the stable text format. All four headings are always
    /// present, in order, even when empty.
    pub fn render(&self) -> String {
        let mut out = format!("digest-schema: {}\n", self.schema_version);

        out.push('\n');
        out.push_str(HEADING_HINGES);
        out.push('\n');
        for hinge in &self.hinges {
            out.push_str(&format!("- [{}] {}\n", hinge.id, hinge.summary));
        }

        out.push('\n');
        out.push_str(HEADING_STANDINGS);
        out.push('\n');
        for standing in &self.standings {
            out.push_str(&format!("- {}: {}\n", standing.faction, standing.reason));
        }

        out.push('\n');
        out.push_str(HEADING_ANCHORS);
        out.push('\n');
        for anchor in &self.anchors {
            if parse_compress_marker(anchor).is_some() {
                out.push_str(anchor);
                out.push('\n');
            } else {
                out.push_str(&format!("- {}\n", anchor));
            }
        }

        out.push('\n');
        out.push_str(HEADING_THREADS);
        out.push('\n');
        for thread in &self.threads {
            if thread.trigger.is_empty() {
                out.push_str(&format!("- {}\n", thread.name));
            } else {
                out.push_str(&format!("- {} (trigger: {})\n", thread.name, thread.trigger));
            }
        }

        for (heading, lines) in &self.trailing {
            out.push('\n');
            out.push_str(&format!("## {}\n", heading));
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
        }

        out
    }

    /// Fold the oldest NPC anchors into a count marker until the
    /// rendered digest fits the budget. The hinge index and standing
    /// reasons are never touched by this path.
    pub fn trim_to_budget(&mut self, budget: u32, counter: &dyn TokenCounter) {
        if counter.count(&self.render()) <= budget {
            return;
        }

        // Absorb an existing marker so repeated trims accumulate
        let mut compressed = match self.anchors.first().and_then(|a| parse_compress_marker(a)) {
            Some(count) => {
                self.anchors.remove(0);
                count
            }
            None => 0,
        };

        // Fold oldest anchors one at a time until the digest fits or
        // none remain
        while !self.anchors.is_empty() {
            self.anchors.remove(0);
            compressed += 1;
            self.anchors.insert(0, compress_marker(compressed));
            if counter.count(&self.render()) <= budget {
                return;
            }
            self.anchors.remove(0);
        }
        if compressed > 0 {
            self.anchors.insert(0, compress_marker(compressed));
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> u32 {
            text.split_whitespace().count() as u32
        }
    }

    fn sample() -> Digest {
        Digest {
            schema_version: 1,
            hinges: vec![
                HingeEntry {
                    id: "betrayed_architects".to_string(),
                    summary: "Sold the vault codes; the Architects marked the crew.".to_string(),
                },
                HingeEntry {
                    id: "spared_warden".to_string(),
                    summary: "Let the warden live; she owes a debt.".to_string(),
                },
            ],
            standings: vec![StandingEntry {
                faction: "architects".to_string(),
                reason: "Hostile since the vault betrayal.".to_string(),
            }],
            anchors: vec![
                "Ada remembers the crew broke quarantine".to_string(),
                "Warden Sel owes a life debt".to_string(),
            ],
            threads: vec![ThreadEntry {
                name: "missing_cargo".to_string(),
                trigger: "docking at Meridian".to_string(),
            }],
            trailing: Vec::new(),
        }
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let digest = sample();
        let rendered = digest.render();
        let parsed = Digest::parse(&rendered);
        assert_eq!(parsed, digest);
    }

    #[test]
    fn test_render_has_headings_in_order() {
        let rendered = Digest::default().render();
        let hinge = rendered.find(HEADING_HINGES).unwrap();
        let standing = rendered.find(HEADING_STANDINGS).unwrap();
        let anchors = rendered.find(HEADING_ANCHORS).unwrap();
        let threads = rendered.find(HEADING_THREADS).unwrap();
        assert!(hinge < standing && standing < anchors && anchors < threads);
        assert!(rendered.starts_with("digest-schema: 1\n"));
    }

    #[test]
    fn test_parse_empty_text() {
        let digest = Digest::parse("");
        assert!(digest.is_empty());
        assert_eq!(digest.schema_version, DIGEST_SCHEMA_VERSION);
    }

    #[test]
    fn test_parse_preserves_unknown_sections() {
        let text = "digest-schema: 2\n\n## Hinge Index\n- [h1] a thing happened\n\n## Standing Reasons\n\n## NPC Memory Anchors\n\n## Open Threads\n\n## Future Section\nsome line the current reader does not know\n";
        let digest = Digest::parse(text);
        assert_eq!(digest.schema_version, 2);
        assert_eq!(digest.hinges.len(), 1);
        assert_eq!(
            digest.trailing,
            vec![(
                "Future Section".to_string(),
                vec!["some line the current reader does not know".to_string()]
            )]
        );
        // And it survives a round trip
        let again = Digest::parse(&digest.render());
        assert_eq!(again.trailing, digest.trailing);
    }

    #[test]
    fn test_covers_hinge() {
        let digest = sample();
        assert!(digest.covers_hinge("betrayed_architects"));
        assert!(!digest.covers_hinge("unknown_hinge"));
    }

    #[test]
    fn test_trim_compresses_oldest_anchors_first() {
        let mut digest = sample();
        for i in 0..30 {
            digest.anchors.push(format!("anchor number {} with several words of detail", i));
        }
        let full = WordCounter.count(&digest.render());
        let budget = full - 40;

        digest.trim_to_budget(budget, &WordCounter);

        assert!(WordCounter.count(&digest.render()) <= budget);
        // Hinges and standings untouched
        assert_eq!(digest.hinges.len(), 2);
        assert_eq!(digest.standings.len(), 1);
        // Oldest anchors folded into the marker
        assert!(parse_compress_marker(&digest.anchors[0]).is_some());
        assert!(!digest
            .anchors
            .iter()
            .any(|a| a.contains("Ada remembers")));
    }

    #[test]
    fn test_trim_noop_within_budget() {
        let mut digest = sample();
        let before = digest.clone();
        digest.trim_to_budget(10_000, &WordCounter);
        assert_eq!(digest, before);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
