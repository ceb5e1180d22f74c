use std::cmp::Ordering;

use hcl::{Body, Expression, Structure};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

const SCALAR_RULES: &[&str] = &["acl", "keyring", "mesh", "operator", "peering"];
const BLOCK_RULES: &[&str] = &[
    "agent", "event", "identity", "key", "node", "query", "service", "session",
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ParsedRule {
    pub rtype: String,
    #[serde(rename = "match", default)]
    pub match_kind: String,
    #[serde(default)]
    pub param: String,
    pub access: String,
}

impl ParsedRule {
    pub fn scalar(rtype: &str, access: &str) -> Self {
        Self {
            rtype: rtype.to_string(),
            access: access.to_string(),
            ..Self::default()
        }
    }

    pub fn block(rtype: &str, match_kind: &str, param: &str, access: &str) -> Self {
        Self {
            rtype: rtype.to_string(),
            match_kind: match_kind.to_string(),
            param: param.to_string(),
            access: access.to_string(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        SCALAR_RULES.contains(&self.rtype.as_str())
    }
}

impl Serialize for ParsedRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let scalar = self.is_scalar();
        let mut map = serializer.serialize_map(Some(if scalar { 2 } else { 4 }))?;
        map.serialize_entry("rtype", &self.rtype)?;
        map.serialize_entry("access", &self.access)?;
        if !scalar {
            map.serialize_entry("match", &self.match_kind)?;
            map.serialize_entry("param", &self.param)?;
        }
        map.end()
    }
}

impl Ord for ParsedRule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rtype
            .cmp(&other.rtype)
            .then_with(|| match_rank(&self.match_kind).cmp(&match_rank(&other.match_kind)))
            .then_with(|| self.param.cmp(&other.param))
            .then_with(|| access_rank(&self.access).cmp(&access_rank(&other.access)))
            .then_with(|| self.access.cmp(&other.access))
    }
}

impl PartialOrd for ParsedRule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn match_rank(match_kind: &str) -> u8 {
    match match_kind {
        "exact" => 0,
        "prefix" => 1,
        "all" => 2,
        _ => 0,
    }
}

fn access_rank(access: &str) -> u8 {
    match access {
        "write" => 1,
        "deny" => 2,
        _ => 0,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub parsed: Vec<ParsedRule>,
    pub unparsed: Vec<String>,
}

/// Parses an ACL rule document into a sorted rule list. Entries that are not
/// ACL rule types end up in `unparsed` by name.
pub fn parse_rules(rules: &str) -> Result<RuleSet, String> {
    if rules.trim().is_empty() {
        return Ok(RuleSet::default());
    }
    let body: Body = hcl::parse(rules).map_err(|err| err.to_string())?;
    let mut set = RuleSet::default();
    for structure in body.iter() {
        match structure {
            Structure::Attribute(attr) => {
                let key = attr.key();
                if !SCALAR_RULES.contains(&key) {
                    set.unparsed.push(key.to_string());
                    continue;
                }
                let access = string_value(attr.expr())
                    .ok_or_else(|| format!("{key} must be a string"))?;
                set.parsed.push(ParsedRule::scalar(key, access));
            }
            Structure::Block(block) => {
                let identifier = block.identifier();
                let (rtype, prefixed) = match identifier.strip_suffix("_prefix") {
                    Some(base) => (base, true),
                    None => (identifier, false),
                };
                if !BLOCK_RULES.contains(&rtype) {
                    set.unparsed.push(identifier.to_string());
                    continue;
                }
                let param = block
                    .labels()
                    .first()
                    .map(|label| label.as_str())
                    .ok_or_else(|| format!("{identifier} block requires a label"))?;
                let access = block_policy(block.body()).ok_or_else(|| {
                    format!("{identifier} \"{param}\" must set policy")
                })?;
                let match_kind = match (prefixed, param.is_empty()) {
                    (false, _) => "exact",
                    (true, false) => "prefix",
                    (true, true) => "all",
                };
                set.parsed
                    .push(ParsedRule::block(rtype, match_kind, param, access));
            }
        }
    }
    set.parsed.sort();
    Ok(set)
}

fn block_policy(body: &Body) -> Option<&str> {
    body.attributes()
        .find(|attr| attr.key() == "policy")
        .and_then(|attr| string_value(attr.expr()))
}

fn string_value(expr: &Expression) -> Option<&str> {
    match expr {
        Expression::String(value) => Some(value.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_rules_sort_after_exact_ones() {
        let mut rules = vec![
            ParsedRule::block("key", "prefix", "a", "read"),
            ParsedRule::block("key", "exact", "z", "read"),
            ParsedRule::scalar("acl", "write"),
        ];
        rules.sort();
        assert_eq!(rules[0].rtype, "acl");
        assert_eq!(rules[1].match_kind, "exact");
        assert_eq!(rules[2].match_kind, "prefix");
    }

    #[test]
    fn deny_sorts_last_for_same_param() {
        let mut rules = vec![
            ParsedRule::block("key", "exact", "a", "deny"),
            ParsedRule::block("key", "exact", "a", "write"),
            ParsedRule::block("key", "exact", "a", "read"),
        ];
        rules.sort();
        let access: Vec<&str> = rules.iter().map(|rule| rule.access.as_str()).collect();
        assert_eq!(access, vec!["read", "write", "deny"]);
    }

    #[test]
    fn scalar_rules_serialize_without_match() {
        let json = serde_json::to_value(ParsedRule::scalar("operator", "read")).expect("json");
        assert_eq!(json, serde_json::json!({"rtype": "operator", "access": "read"}));
    }
}
