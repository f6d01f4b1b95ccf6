use std::sync::Arc;

use quill_service::{Collaborators, CompanionService};

use crate::forward::Forwarder;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<CompanionService>,
	pub forwarder: Arc<Forwarder>,
	pub(crate) companion_token: Option<String>,
}
impl AppState {
	pub fn new(config: quill_config::Config) -> color_eyre::Result<Self> {
		let collaborators = Collaborators::connect(&config)?;

		Self::with_collaborators(config, collaborators)
	}

	/// Builds the state around caller-supplied collaborators. Production uses
	/// [`Self::new`]; tests swap in in-memory ones.
	pub fn with_collaborators(
		config: quill_config::Config,
		collaborators: Collaborators,
	) -> color_eyre::Result<Self> {
		let forwarder = Forwarder::new(&config.upstream)?;
		let companion_token = config.security.companion_token.clone();
		let service = CompanionService::new(config, collaborators)?;

		Ok(Self {
			service: Arc::new(service),
			forwarder: Arc::new(forwarder),
			companion_token,
		})
	}
}
