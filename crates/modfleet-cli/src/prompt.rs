//! Terminal prompts for credentials and plan confirmation.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password};
use modfleet_core::{CredentialPrompt, Credentials, FleetError, PlanApproval};

/// Asks for a hosting user and access token on the terminal.
#[derive(Default)]
pub struct TerminalPrompt {
    theme: ColorfulTheme,
}

impl CredentialPrompt for TerminalPrompt {
    fn prompt(&self) -> modfleet_core::Result<Credentials> {
        let user: String = Input::with_theme(&self.theme)
            .with_prompt("Hosting user")
            .interact_text()
            .map_err(prompt_error)?;
        let token = Password::with_theme(&self.theme)
            .with_prompt("Access token")
            .interact()
            .map_err(prompt_error)?;
        Ok(Credentials::new(user.trim(), token.trim()))
    }
}

/// Shows the sorted chain and asks before a `sync` run starts.
#[derive(Default)]
pub struct TerminalApproval {
    theme: ColorfulTheme,
}

impl PlanApproval for TerminalApproval {
    fn approve(&self, summary: &str, chain: &[String]) -> bool {
        eprintln!("{summary}");
        eprintln!("Dependency chain ({}):", chain.len());
        for (i, identity) in chain.iter().enumerate() {
            eprintln!("  {}) {identity}", i + 1);
        }
        Confirm::with_theme(&self.theme)
            .with_prompt("Continue?")
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

fn prompt_error(err: dialoguer::Error) -> FleetError {
    FleetError::CredentialsUnavailable(err.to_string())
}
