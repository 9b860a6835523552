use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::error::{AutomationError, AutomationResult};
use crate::models::WindowState;
use crate::platform::{AutomationBackend, KeyChord};
use crate::settings::KeyBindings;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "injector";

use crate::{log_debug, log_info, log_warn};

/// Key bindings parsed once at construction.
#[derive(Debug, Clone)]
pub struct ResolvedKeys {
    pub focus_input: KeyChord,
    pub select_all: KeyChord,
    pub clear: KeyChord,
    pub paste: KeyChord,
    pub submit: KeyChord,
    pub copy_response: KeyChord,
}

impl ResolvedKeys {
    pub fn from_bindings(keys: &KeyBindings) -> Result<Self> {
        Ok(Self {
            focus_input: KeyChord::parse(&keys.focus_input)?,
            select_all: KeyChord::parse(&keys.select_all)?,
            clear: KeyChord::parse(&keys.clear)?,
            paste: KeyChord::parse(&keys.paste)?,
            submit: KeyChord::parse(&keys.submit)?,
            copy_response: KeyChord::parse(&keys.copy_response)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct InjectionAck {
    pub chars: usize,
    /// False when the backend cannot read the field back.
    pub verified: bool,
    /// Clipboard content from before the paste, restored afterwards.
    pub saved_clipboard: Option<String>,
}

/// Delivers a prompt by clipboard paste; all-or-nothing from the caller's view.
///
/// The target window must already be focused.
pub struct InputInjector {
    backend: Arc<dyn AutomationBackend>,
    keys: ResolvedKeys,
    restore_clipboard: bool,
    /// Set while a paste may have left text in the input field.
    dirty: AtomicBool,
}

impl InputInjector {
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        keys: ResolvedKeys,
        restore_clipboard: bool,
    ) -> Self {
        Self {
            backend,
            keys,
            restore_clipboard,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Empties the target input field.
    pub async fn reset(&self, window: &WindowState) -> AutomationResult<()> {
        let handle = &window.handle;
        self.backend.send_keys(handle, &self.keys.focus_input).await?;
        self.backend.send_keys(handle, &self.keys.select_all).await?;
        self.backend.send_keys(handle, &self.keys.clear).await?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn inject(&self, window: &WindowState, text: &str) -> AutomationResult<InjectionAck> {
        if text.trim().is_empty() {
            return Err(AutomationError::Injection {
                reason: "prompt is empty".into(),
            });
        }

        let saved_clipboard = if self.restore_clipboard {
            match self.backend.read_clipboard().await {
                Ok(saved) => Some(saved),
                Err(err) => {
                    log_warn!("could not save clipboard: {err}");
                    None
                }
            }
        } else {
            None
        };

        match self.deliver(window, text).await {
            Ok(verified) => {
                self.restore(saved_clipboard.as_deref()).await;
                log_info!(
                    "injected {} chars into {} (verified: {})",
                    text.chars().count(),
                    window.handle,
                    verified
                );
                Ok(InjectionAck {
                    chars: text.chars().count(),
                    verified,
                    saved_clipboard,
                })
            }
            Err(err) => {
                log_warn!("injection failed, clearing input field: {err}");
                if let Err(cleanup) = self.reset(window).await {
                    log_warn!("input cleanup failed: {cleanup}");
                }
                self.restore(saved_clipboard.as_deref()).await;
                Err(match err {
                    AutomationError::Backend(source) => AutomationError::Injection {
                        reason: format!("{source:#}"),
                    },
                    other => other,
                })
            }
        }
    }

    async fn deliver(&self, window: &WindowState, text: &str) -> AutomationResult<bool> {
        let handle = &window.handle;

        self.reset(window).await?;
        self.backend.write_clipboard(text).await?;

        self.dirty.store(true, Ordering::SeqCst);
        self.backend.send_keys(handle, &self.keys.paste).await?;

        let verified = if self.backend.capabilities().read_input_field {
            match self.backend.read_input_field(handle).await? {
                Some(field) if field.trim() == text.trim() => true,
                Some(field) => {
                    return Err(AutomationError::Injection {
                        reason: format!(
                            "read-back mismatch: expected {} chars, field holds {}",
                            text.chars().count(),
                            field.chars().count()
                        ),
                    });
                }
                None => false,
            }
        } else {
            false
        };

        self.backend.send_keys(handle, &self.keys.submit).await?;
        self.dirty.store(false, Ordering::SeqCst);
        log_debug!("submitted prompt to {}", handle);
        Ok(verified)
    }

    /// Puts the user's clipboard back; failures are logged only.
    pub async fn restore(&self, saved: Option<&str>) {
        let Some(saved) = saved else {
            return;
        };
        if let Err(err) = self.backend.write_clipboard(saved).await {
            log_warn!("could not restore clipboard: {err}");
        }
    }
}
