//! Prompt augmentation for OpenAI-compatible request bodies.
//!
//! Chat bodies carry the question in their last `user` message; legacy
//! completion bodies carry it in `prompt`. Augmentation rewrites that one slot
//! and leaves every other field untouched so the upstream sees a request it
//! already understands.

use serde_json::Value;

use crate::CompanionService;

const CONTEXT_PREAMBLE: &str = "Here are some documents that may help answer the question:";
const QUESTION_PREAMBLE: &str =
	"Answer the following question based on the documents above and your own knowledge:";

/// Where the question lives inside the request body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSlot {
	/// Legacy completion body, top-level `prompt` string.
	Completion,
	/// Chat body, `messages[index].content` of the last `user` message.
	Chat { index: usize },
}

/// Locates the question in `body`: the newest `user` message with plain
/// string content (content-part arrays are passed over), or the `prompt`
/// field. `None` when no such slot exists.
pub fn extract_prompt(body: &Value) -> Option<(PromptSlot, String)> {
	if let Some(messages) = body.get("messages").and_then(Value::as_array) {
		for (index, message) in messages.iter().enumerate().rev() {
			if message.get("role").and_then(Value::as_str) != Some("user") {
				continue;
			}

			let Some(content) = message.get("content").and_then(Value::as_str) else {
				continue;
			};

			return Some((PromptSlot::Chat { index }, content.to_string()));
		}

		return None;
	}

	let prompt = body.get("prompt").and_then(Value::as_str)?;

	Some((PromptSlot::Completion, prompt.to_string()))
}

/// Whether `body` carries any chat `user` message at all, regardless of its
/// content shape.
pub fn has_user_message(body: &Value) -> bool {
	body.get("messages")
		.and_then(Value::as_array)
		.map(|messages| {
			messages
				.iter()
				.any(|message| message.get("role").and_then(Value::as_str) == Some("user"))
		})
		.unwrap_or(false)
}

/// Writes `prompt` back into the slot `extract_prompt` found.
pub fn inject_prompt(body: &mut Value, slot: &PromptSlot, prompt: String) {
	match slot {
		PromptSlot::Completion => {
			body["prompt"] = Value::String(prompt);
		},
		PromptSlot::Chat { index } => {
			body["messages"][*index]["content"] = Value::String(prompt);
		},
	}
}

/// Folds the retrieved documents and the original question into one prompt.
pub fn compose_prompt(question: &str, documents: &[String]) -> String {
	format!(
		"{CONTEXT_PREAMBLE}\n\n{}\n\n{QUESTION_PREAMBLE}\n\n{question}",
		documents.join("\n\n")
	)
}

impl CompanionService {
	/// Augments an OpenAI-compatible request body with retrieved context.
	///
	/// Returns `None` when the body carries no prompt at all. Retrieval
	/// failures, empty retrievals, and user messages without an augmentable
	/// string slot (content-part arrays) degrade to the original body so the
	/// upstream call can still proceed.
	pub async fn augment_request(&self, body: &Value) -> Option<Value> {
		let Some((slot, question)) = extract_prompt(body) else {
			if has_user_message(body) {
				tracing::debug!("No string prompt slot; forwarding the request unaugmented.");

				return Some(body.clone());
			}

			return None;
		};
		let context = match self.retrieve(&question).await {
			Ok(context) => context,
			Err(err) => {
				tracing::warn!(error = %err, "Retrieval failed; forwarding the request unaugmented.");

				return Some(body.clone());
			},
		};

		if context.documents.is_empty() {
			return Some(body.clone());
		}

		let documents: Vec<String> =
			context.documents.into_iter().map(|document| document.markdown).collect();
		let mut augmented = body.clone();

		inject_prompt(&mut augmented, &slot, compose_prompt(&question, &documents));

		Some(augmented)
	}
}
