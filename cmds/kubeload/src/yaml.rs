//! YAML output for listed objects.

use serde::Serialize;
use tracing::instrument;

use crate::manifest::DOCUMENT_SEPARATOR;

fn options() -> serde_saphyr::SerializerOptions {
	serde_saphyr::SerializerOptions {
		indent_step: 2,
		indent_array: Some(0),
		prefer_block_scalars: true,
		empty_map_as_braces: true,
		empty_array_as_brackets: true,
		line_width: Some(80),
		quote_ambiguous_keys: true,
		quote_numeric_strings: true,
		..Default::default()
	}
}

/// Serialize a value to a single YAML document, without a leading `---`.
#[instrument(skip_all)]
pub fn to_yaml<T: Serialize>(value: &T) -> Result<String, serde_saphyr::ser_error::Error> {
	let mut output = String::new();
	serde_saphyr::to_fmt_writer_with_options(&mut output, value, options())?;
	match output.strip_prefix("---\n") {
		Some(body) => Ok(body.to_string()),
		None => Ok(output),
	}
}

/// Serialize values as a YAML stream, documents separated by `---`.
pub fn to_yaml_stream<T: Serialize>(
	values: &[T],
) -> Result<String, serde_saphyr::ser_error::Error> {
	let mut output = String::new();
	for (i, value) in values.iter().enumerate() {
		if i != 0 {
			output.push_str(DOCUMENT_SEPARATOR.trim_start_matches('\n'));
		}
		output.push_str(&to_yaml(value)?);
	}
	Ok(output)
}
