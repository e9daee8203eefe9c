use std::{error::Error, fmt};

/// Several independent failures of one batch operation.
#[derive(Debug)]
pub struct MultiError<E>(Vec<E>);

impl<E> MultiError<E> {
	/// `None` if nothing failed.
	pub fn from_vec(errors: Vec<E>) -> Option<Self> {
		if errors.is_empty() {
			None
		} else {
			Some(Self(errors))
		}
	}

	pub fn errors(&self) -> &[E] {
		&self.0
	}

	pub fn into_inner(self) -> Vec<E> {
		self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl<E: fmt::Display> fmt::Display for MultiError<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if let [only] = self.0.as_slice() {
			return only.fmt(f);
		}

		write!(f, "{} errors occurred:", self.0.len())?;
		for error in &self.0 {
			write!(f, "\n\t* {error}")?;
		}
		Ok(())
	}
}

impl<E: Error + 'static> Error for MultiError<E> {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self.0.as_slice() {
			[only] => only.source(),
			_ => None,
		}
	}
}
