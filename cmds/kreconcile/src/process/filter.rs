//! Target expressions (`-t/--target`) selecting manifests by `Kind/name`.

use regex::Regex;
use thiserror::Error;

use crate::manifest::{List, Manifest};

#[derive(Debug, Error)]
#[error(
	"{expr}: invalid target expression. See \
	 https://tanka.dev/output-filtering/#regular-expressions for details on regular expressions"
)]
pub struct BadExpr {
	pub expr: String,
	#[source]
	pub source: regex::Error,
}

/// One compiled target expression.
#[derive(Debug, Clone)]
struct Expr {
	regex: Regex,
	/// Written as `!expr`: excludes what it matches.
	negated: bool,
}

/// A set of target expressions.
///
/// Positive expressions are ORed: a manifest is kept if any matches, or if
/// there are none. A matching negated expression always drops the manifest.
/// All expressions are case-insensitive and anchored at both ends.
#[derive(Debug, Clone, Default)]
pub struct Matchers {
	exprs: Vec<Expr>,
}

impl Matchers {
	pub fn new<S: AsRef<str>>(exprs: &[S]) -> Result<Self, BadExpr> {
		let exprs = exprs
			.iter()
			.map(|raw| {
				let raw = raw.as_ref();
				let (negated, pattern) = match raw.strip_prefix('!') {
					Some(rest) => (true, rest),
					None => (false, raw),
				};
				let regex = Regex::new(&format!("(?i)^{pattern}$")).map_err(|source| BadExpr {
					expr: raw.to_string(),
					source,
				})?;
				Ok(Expr { regex, negated })
			})
			.collect::<Result<_, _>>()?;
		Ok(Self { exprs })
	}

	pub fn is_empty(&self) -> bool {
		self.exprs.is_empty()
	}

	pub fn matches(&self, manifest: &Manifest) -> bool {
		self.matches_str(&manifest.kind_name())
	}

	fn matches_str(&self, kind_name: &str) -> bool {
		let mut positives = self.exprs.iter().filter(|e| !e.negated).peekable();
		let included =
			positives.peek().is_none() || positives.any(|e| e.regex.is_match(kind_name));
		let excluded = self
			.exprs
			.iter()
			.any(|e| e.negated && e.regex.is_match(kind_name));
		included && !excluded
	}

	/// Keep only the manifests these expressions select.
	pub fn filter(&self, list: List) -> List {
		if self.is_empty() {
			return list;
		}
		list.into_iter().filter(|m| self.matches(m)).collect()
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	fn manifest(kind: &str, name: &str) -> Manifest {
		Manifest::new(json!({"apiVersion": "v1", "kind": kind, "metadata": {"name": name}})).unwrap()
	}

	#[rstest]
	#[case::empty_matches_all(&[], "Service/grafana", true)]
	#[case::case_insensitive(&["deployment/.*"], "Deployment/app", true)]
	#[case::anchored(&["deployment/app"], "Deployment/app-canary", false)]
	#[case::or(&["service/.*", "deployment/.*"], "Deployment/app", true)]
	#[case::negated_only(&["!secret/.*"], "Deployment/app", true)]
	#[case::negated_excludes(&["!secret/.*"], "Secret/token", false)]
	#[case::negated_wins(&["secret/.*", "!secret/token"], "Secret/token", false)]
	#[case::positive_and_negated(&["secret/.*", "!secret/token"], "Secret/other", true)]
	fn test_matches(#[case] exprs: &[&str], #[case] kind_name: &str, #[case] expected: bool) {
		let matchers = Matchers::new(exprs).unwrap();
		assert_eq!(matchers.matches_str(kind_name), expected);
	}

	#[test]
	fn test_filter_keeps_only_targets() {
		let list = List::from(vec![
			manifest("Deployment", "app"),
			manifest("Service", "app"),
		]);
		let filtered = Matchers::new(&["deployment/.*"]).unwrap().filter(list);

		assert_eq!(filtered.len(), 1);
		assert_eq!(filtered[0].kind_name(), "Deployment/app");
	}

	#[test]
	fn test_bad_expr() {
		let err = Matchers::new(&["deployment/(unclosed"]).unwrap_err();
		assert_eq!(err.expr, "deployment/(unclosed");
		assert_matches!(err.source, regex::Error::Syntax(_));
		assert!(err.to_string().contains("output-filtering"));
	}
}
