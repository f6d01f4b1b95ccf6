use color_eyre::eyre;
use tokenizers::Tokenizer;

/// Token counter for the context budget. Uses the tokenizer the upstream
/// model expects when one is configured; otherwise a chars/4 estimate, which
/// errs on the generous side for English prose.
pub enum TokenBudget {
	Pretrained(Box<Tokenizer>),
	Approximate,
}

impl TokenBudget {
	pub fn load(repo: Option<&str>) -> color_eyre::Result<Self> {
		let Some(repo) = repo else {
			return Ok(Self::Approximate);
		};
		let tokenizer = Tokenizer::from_pretrained(repo, None)
			.map_err(|err| eyre::eyre!("Failed to load tokenizer {repo}: {err}."))?;

		Ok(Self::Pretrained(Box::new(tokenizer)))
	}

	pub fn count(&self, text: &str) -> usize {
		match self {
			Self::Pretrained(tokenizer) => match tokenizer.encode(text, false) {
				Ok(encoding) => encoding.len(),
				Err(err) => {
					tracing::warn!(error = %err, "Tokenizer failed to encode; falling back to the estimate.");

					approximate_tokens(text)
				},
			},
			Self::Approximate => approximate_tokens(text),
		}
	}
}

fn approximate_tokens(text: &str) -> usize {
	text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unset_repo_falls_back_to_the_estimate() {
		let budget = TokenBudget::load(None).expect("Fallback budget must load.");

		assert!(matches!(budget, TokenBudget::Approximate));
	}

	#[test]
	fn estimate_rounds_up() {
		assert_eq!(approximate_tokens(""), 0);
		assert_eq!(approximate_tokens("abc"), 1);
		assert_eq!(approximate_tokens("abcd"), 1);
		assert_eq!(approximate_tokens("abcde"), 2);
		assert_eq!(approximate_tokens(&"a".repeat(3200)), 800);
	}
}
