//! Terminal interaction: confirmation prompts and colored diffs.

use std::{
	fmt,
	io::{self, BufRead, BufReader, Stdin, Stderr, Write},
};

use clap::ValueEnum;
use nu_ansi_term::{Color, Style};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the user has to type to confirm.
pub const APPROVAL: &str = "yes";

#[derive(Debug, Error)]
pub enum ConfirmError {
	#[error("aborted by user")]
	Aborted,

	#[error("reading confirmation")]
	Io(#[source] io::Error),
}

/// Asks the user before something destructive happens.
pub trait Confirm: Send {
	/// Show `message` and wait for approval. Anything but approval is
	/// [`ConfirmError::Aborted`].
	fn confirm(&mut self, message: &str) -> Result<(), ConfirmError>;
}

/// Line-based prompt over any reader and writer.
pub struct Prompt<R, W> {
	input: R,
	output: W,
}

impl<R, W> Prompt<R, W> {
	pub fn new(input: R, output: W) -> Self {
		Self { input, output }
	}

	pub fn into_output(self) -> W {
		self.output
	}
}

/// Prompt on stdin, asking on stderr so stdout stays clean.
pub fn stdin_prompt() -> Prompt<BufReader<Stdin>, Stderr> {
	Prompt::new(BufReader::new(io::stdin()), io::stderr())
}

impl<R: BufRead + Send, W: Write + Send> Confirm for Prompt<R, W> {
	fn confirm(&mut self, message: &str) -> Result<(), ConfirmError> {
		writeln!(self.output, "{message}").map_err(ConfirmError::Io)?;
		write!(self.output, "Please type '{APPROVAL}' to confirm: ").map_err(ConfirmError::Io)?;
		self.output.flush().map_err(ConfirmError::Io)?;

		let mut answer = String::new();
		let read = self.input.read_line(&mut answer).map_err(ConfirmError::Io)?;
		if read == 0 {
			return Err(ConfirmError::Io(io::Error::new(
				io::ErrorKind::UnexpectedEof,
				"no answer on stdin",
			)));
		}

		if answer.trim_end_matches(['\r', '\n']) != APPROVAL {
			return Err(ConfirmError::Aborted);
		}
		Ok(())
	}
}

/// When to color diff output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
	/// Color when writing to a terminal.
	#[default]
	Auto,
	Always,
	Never,
}

impl ColorMode {
	pub fn enabled(self, is_terminal: bool) -> bool {
		match self {
			ColorMode::Auto => is_terminal,
			ColorMode::Always => true,
			ColorMode::Never => false,
		}
	}
}

impl fmt::Display for ColorMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ColorMode::Auto => write!(f, "auto"),
			ColorMode::Always => write!(f, "always"),
			ColorMode::Never => write!(f, "never"),
		}
	}
}

/// Color a unified diff line by line.
pub fn colordiff(diff: &str) -> String {
	let mut out = String::with_capacity(diff.len());
	for line in diff.split_inclusive('\n') {
		let (text, newline) = match line.strip_suffix('\n') {
			Some(text) => (text, "\n"),
			None => (line, ""),
		};
		let style = if text.starts_with("diff ") || text.starts_with("+++ ") || text.starts_with("--- ") {
			Style::new().bold()
		} else if text.starts_with("@@") {
			Color::Cyan.normal()
		} else if text.starts_with('+') {
			Color::Green.normal()
		} else if text.starts_with('-') {
			Color::Red.normal()
		} else {
			out.push_str(line);
			continue;
		};
		out.push_str(&style.paint(text).to_string());
		out.push_str(newline);
	}
	out
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use assert_matches::assert_matches;
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::approved("yes\n", true)]
	#[case::approved_crlf("yes\r\n", true)]
	#[case::no_newline("yes", true)]
	#[case::declined("no\n", false)]
	#[case::uppercase("YES\n", false)]
	#[case::padded(" yes\n", false)]
	fn test_confirm(#[case] input: &str, #[case] approved: bool) {
		let mut prompt = Prompt::new(Cursor::new(input.to_string()), Vec::new());
		let result = prompt.confirm("Applying to namespace 'default'.");

		if approved {
			assert_matches!(result, Ok(()));
		} else {
			assert_matches!(result, Err(ConfirmError::Aborted));
		}

		let output = String::from_utf8(prompt.into_output()).unwrap();
		assert_eq!(
			output,
			"Applying to namespace 'default'.\nPlease type 'yes' to confirm: "
		);
	}

	#[test]
	fn test_confirm_eof_is_an_error() {
		let mut prompt = Prompt::new(Cursor::new(String::new()), Vec::new());
		assert_matches!(prompt.confirm("sure?"), Err(ConfirmError::Io(_)));
	}

	#[test]
	fn test_color_mode() {
		assert!(ColorMode::Auto.enabled(true));
		assert!(!ColorMode::Auto.enabled(false));
		assert!(ColorMode::Always.enabled(false));
		assert!(!ColorMode::Never.enabled(true));
	}

	#[test]
	fn test_colordiff() {
		let colored = colordiff("--- a\n+++ b\n@@ -1 +1 @@\n-old\n+new\n same\n");

		assert!(colored.contains(&Color::Red.paint("-old").to_string()));
		assert!(colored.contains(&Color::Green.paint("+new").to_string()));
		assert!(colored.contains(&Color::Cyan.paint("@@ -1 +1 @@").to_string()));
		assert!(colored.ends_with(" same\n"));
	}
}
