//! Version Buckets
//!
//! Splits candidates into one bucket per version rule plus a remainder and
//! draws a bucket with the configured probabilities.

use super::strategy::VersionRule;
use crate::registry::NodeEntry;
use rand::Rng;
use semver::{Version, VersionReq};

/// Candidates sharing a probability mass
#[derive(Debug)]
pub struct Bucket<'a> {
    pub prob: f64,
    pub members: Vec<&'a NodeEntry>,
}

/// Assign every candidate to the first rule its version satisfies; the rest
/// (including missing or malformed versions) go to the remainder bucket,
/// which comes last. Empty buckets are dropped.
pub fn bucketize<'a>(candidates: &'a [NodeEntry], rules: &[VersionRule]) -> Vec<Bucket<'a>> {
    let ranges: Vec<Option<VersionReq>> = rules
        .iter()
        .map(|rule| VersionReq::parse(&rule.version).ok())
        .collect();

    let mut buckets: Vec<Bucket<'a>> = rules
        .iter()
        .map(|rule| Bucket {
            prob: rule.prob,
            members: Vec::new(),
        })
        .collect();
    let assigned: f64 = rules.iter().map(|rule| rule.prob).sum();
    let mut remainder = Bucket {
        prob: (1.0 - assigned).max(0.0),
        members: Vec::new(),
    };

    for candidate in candidates {
        let version = candidate.version().and_then(|v| Version::parse(v).ok());
        let slot = version.and_then(|version| {
            ranges.iter().position(|range| {
                range
                    .as_ref()
                    .map(|range| range.matches(&version))
                    .unwrap_or(false)
            })
        });
        match slot {
            Some(index) => buckets[index].members.push(candidate),
            None => remainder.members.push(candidate),
        }
    }

    buckets.push(remainder);
    buckets.retain(|bucket| !bucket.members.is_empty());
    buckets
}

/// Weighted bucket draw then uniform choice inside the bucket. Falls back to
/// a uniform choice over all candidates when no bucket carries mass.
pub fn pick<'a, R: Rng + ?Sized>(
    candidates: &'a [NodeEntry],
    rules: &[VersionRule],
    rng: &mut R,
) -> Option<&'a NodeEntry> {
    let buckets = bucketize(candidates, rules);
    let total: f64 = buckets.iter().map(|bucket| bucket.prob).sum();
    if total <= 0.0 {
        return uniform(candidates, rng);
    }

    let mut draw = rng.gen_range(0.0..total);
    for bucket in &buckets {
        if draw < bucket.prob {
            return uniform_ref(&bucket.members, rng);
        }
        draw -= bucket.prob;
    }
    // Float rounding can leave the draw just past the last bucket
    buckets
        .iter()
        .rev()
        .find(|bucket| bucket.prob > 0.0)
        .and_then(|bucket| uniform_ref(&bucket.members, rng))
}

pub(crate) fn uniform<'a, R: Rng + ?Sized>(items: &'a [NodeEntry], rng: &mut R) -> Option<&'a NodeEntry> {
    if items.is_empty() {
        return None;
    }
    Some(&items[rng.gen_range(0..items.len())])
}

fn uniform_ref<'a, R: Rng + ?Sized>(items: &[&'a NodeEntry], rng: &mut R) -> Option<&'a NodeEntry> {
    if items.is_empty() {
        return None;
    }
    Some(items[rng.gen_range(0..items.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::NodeId;
    use serde_json::json;

    fn node(id: &str, version: Option<&str>) -> NodeEntry {
        let mut options = serde_json::Map::new();
        if let Some(version) = version {
            options.insert("version".into(), json!(version));
        }
        NodeEntry::new(NodeId::new(id), id.to_string(), options)
    }

    fn rule(version: &str, prob: f64) -> VersionRule {
        VersionRule {
            version: version.into(),
            prob,
        }
    }

    #[test]
    fn test_first_match_and_remainder() {
        let candidates = vec![
            node("a", Some("1.2.0")),
            node("b", Some("2.0.1")),
            node("c", Some("garbage")),
            node("d", None),
        ];
        // "^1" also satisfies ">=1.0.0" but lands in the first bucket only
        let rules = vec![rule("^1.0.0", 0.5), rule(">=1.0.0", 0.3)];
        let buckets = bucketize(&candidates, &rules);

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].members[0].id.as_str(), "a");
        assert_eq!(buckets[1].members[0].id.as_str(), "b");
        assert_eq!(buckets[2].members.len(), 2);
        assert!((buckets[2].prob - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_empty_buckets_are_dropped() {
        let candidates = vec![node("a", Some("1.0.0"))];
        let buckets = bucketize(&candidates, &[rule("^2.0.0", 0.9)]);
        assert_eq!(buckets.len(), 1);
        assert!((buckets[0].prob - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_zero_mass_falls_back_to_uniform() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        // Only the 2.x bucket has mass, and no candidate is 2.x; remainder has none
        let candidates = vec![node("a", Some("1.0.0")), node("b", Some("1.1.0"))];
        let rules = vec![rule("^1.0.0", 0.0), rule("^2.0.0", 1.0)];
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            assert!(pick(&candidates, &rules, &mut rng).is_some());
        }
    }
}
