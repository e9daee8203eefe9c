//! Deterministic YAML rendering.
//!
//! Object keys are ordered the way go-yaml orders them (a natural sort where
//! digit runs compare numerically), so rendered objects and every diff built
//! from them are stable regardless of how the source value was assembled.

use std::cmp::Ordering;

use serde_json::Value;

pub type YamlError = serde_saphyr::ser_error::Error;

/// Separator between documents of a YAML stream.
const DOCUMENT_SEPARATOR: &str = "---\n";

/// Recursively reorder all object keys with [`natural_key_cmp`].
pub fn sort_keys(value: Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<_> = map.into_iter().collect();
			entries.sort_by(|(a, _), (b, _)| natural_key_cmp(a, b));
			Value::Object(
				entries
					.into_iter()
					.map(|(key, value)| (key, sort_keys(value)))
					.collect(),
			)
		}
		Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
		other => other,
	}
}

/// Accumulate the run of ASCII digits starting at `start` onto `initial`.
///
/// Returns the numeric value and the index right after the run.
fn digit_run(chars: &[char], start: usize, initial: i64) -> (i64, usize) {
	let mut value = initial;
	let mut end = start;
	while let Some(digit) = chars.get(end).and_then(|c| c.to_digit(10)) {
		value = value.saturating_mul(10).saturating_add(i64::from(digit));
		end += 1;
	}
	(value, end)
}

/// go-yaml's key ordering.
///
/// Letters compare by code point. At the first difference between a letter
/// and a non-letter, the letter wins if the common prefix ended in a digit,
/// otherwise the non-letter wins. Digit runs compare by value, then by length.
pub fn natural_key_cmp(a: &str, b: &str) -> Ordering {
	let a: Vec<char> = a.chars().collect();
	let b: Vec<char> = b.chars().collect();
	let mut after_digit = false;

	for (i, (&ca, &cb)) in a.iter().zip(&b).enumerate() {
		if ca == cb {
			after_digit = ca.is_ascii_digit();
			continue;
		}

		match (ca.is_alphabetic(), cb.is_alphabetic()) {
			(true, true) => return ca.cmp(&cb),
			(true, false) if after_digit => return Ordering::Less,
			(true, false) => return Ordering::Greater,
			(false, true) if after_digit => return Ordering::Greater,
			(false, true) => return Ordering::Less,
			(false, false) => {}
		}

		// A zero continuing a non-zero number is significant, not padding.
		let continues_number = (ca == '0' || cb == '0')
			&& a[..i]
				.iter()
				.rev()
				.take_while(|c| c.is_ascii_digit())
				.any(|&c| c != '0');
		let offset = i64::from(continues_number);

		let (na, end_a) = digit_run(&a, i, offset);
		let (nb, end_b) = digit_run(&b, i, offset);

		return na
			.cmp(&nb)
			.then(end_a.cmp(&end_b))
			.then(ca.cmp(&cb));
	}

	a.len().cmp(&b.len())
}

fn serializer_options() -> serde_saphyr::SerializerOptions {
	serde_saphyr::SerializerOptions {
		indent_step: 2,
		indent_array: Some(0),
		prefer_block_scalars: true,
		empty_map_as_braces: true,
		empty_array_as_brackets: true,
		line_width: Some(80),
		scientific_notation_threshold: Some(1000000),
		scientific_notation_small_threshold: Some(0.0001),
		quote_ambiguous_keys: true,
		quote_numeric_strings: true,
		..Default::default()
	}
}

/// Render a single YAML document with sorted keys.
pub fn to_yaml(value: &Value) -> Result<String, YamlError> {
	let sorted = sort_keys(value.clone());
	let mut output = String::new();
	serde_saphyr::to_fmt_writer_with_options(&mut output, &sorted, serializer_options())?;
	Ok(output)
}

/// Like [`to_yaml`], but an empty object (or `null`) renders as nothing.
///
/// Used for the "live" side of a diff where the object does not exist.
pub fn to_yaml_or_empty(value: &Value) -> Result<String, YamlError> {
	match value {
		Value::Null => Ok(String::new()),
		Value::Object(map) if map.is_empty() => Ok(String::new()),
		other => to_yaml(other),
	}
}

/// Render several documents as one `---`-separated stream.
pub fn to_yaml_stream(documents: &[Value]) -> Result<String, YamlError> {
	let rendered = documents
		.iter()
		.map(to_yaml)
		.collect::<Result<Vec<_>, _>>()?;
	Ok(rendered.join(DOCUMENT_SEPARATOR))
}
