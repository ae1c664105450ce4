//! Terminal prompts.

use std::path::{Path, PathBuf};
use std::thread;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use tracing::warn;

use dlkeeper::executor::Reply;
use dlkeeper::gateway::FileChooser;
use dlkeeper::DownloadId;

/// Asks for the save location on the terminal.
///
/// An empty answer cancels the download.
pub struct TerminalChooser;

impl FileChooser for TerminalChooser {
    fn choose_path(&self, id: DownloadId, suggested: &Path, reply: Reply<Option<PathBuf>>) {
        let suggested = suggested.display().to_string();
        // Called on the manager's task, which must not wait for the user.
        thread::spawn(move || {
            let answer = Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Save download {id} as (empty to cancel)"))
                .with_initial_text(suggested)
                .allow_empty(true)
                .interact_text();

            let path = match answer {
                Ok(text) if !text.trim().is_empty() => Some(PathBuf::from(text.trim())),
                Ok(_) => None,
                Err(e) => {
                    warn!(download_id = %id, error = %e, "Save prompt failed");
                    None
                }
            };
            reply.send(path);
        });
    }
}

/// Ask whether to keep a download flagged as dangerous. Defaults to no.
pub fn confirm_dangerous(file_name: &str) -> Result<bool, dialoguer::Error> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("{file_name} may harm your computer. Keep it anyway?"))
        .default(false)
        .interact()
}
