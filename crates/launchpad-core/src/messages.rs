//! User-facing, localized messages for launch errors.
//!
//! The `Display` form of `LaunchError` is meant for logs. What an end user
//! sees comes from here and never includes the internal error chain.

use crate::errors::{LaunchError, PreparationReason, RunnerFailureKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Hu,
}

impl LaunchError {
    pub fn user_message(&self, locale: Locale) -> String {
        match self {
            LaunchError::Preparation(reason) => preparation_message(reason, locale),
            LaunchError::Startup { kind, .. } => startup_message(*kind, locale),
            LaunchError::Shutdown { .. } => match locale {
                Locale::En => "The web application could not be stopped cleanly. It has been released and will be reclaimed by the container engine.".to_string(),
                Locale::Hu => "A webalkalmazást nem sikerült szabályosan leállítani. A futtatás felszabadult, a konténert a konténerkezelő takarítja el.".to_string(),
            },
            LaunchError::ExecutionNotFound(_) => match locale {
                Locale::En => "The requested web application instance does not exist.".to_string(),
                Locale::Hu => "A kért webalkalmazás-példány nem létezik.".to_string(),
            },
            LaunchError::ArtifactNotFound(_) => match locale {
                Locale::En => "The requested submission does not exist.".to_string(),
                Locale::Hu => "A kért beadás nem létezik.".to_string(),
            },
            LaunchError::LogUnavailable(_) => match locale {
                Locale::En => "The run log of the web application is not available.".to_string(),
                Locale::Hu => "A webalkalmazás futási naplója nem érhető el.".to_string(),
            },
            LaunchError::Registry(crate::errors::RegistryError::Conflict(_)) => match locale {
                Locale::En => "Another request is being processed at the moment. Please try again.".to_string(),
                Locale::Hu => "Egy másik kérés feldolgozása folyamatban van. Kérjük, próbálja újra.".to_string(),
            },
            LaunchError::Registry(_)
            | LaunchError::Engine(_)
            | LaunchError::Config(_)
            | LaunchError::Io(_) => match locale {
                Locale::En => "An internal error occurred while managing the web application.".to_string(),
                Locale::Hu => "Belső hiba történt a webalkalmazás kezelése közben.".to_string(),
            },
        }
    }
}

fn preparation_message(reason: &PreparationReason, locale: Locale) -> String {
    match (reason, locale) {
        (PreparationReason::AlreadyRunning, Locale::En) => {
            "An instance of this web application is already running or scheduled.".to_string()
        }
        (PreparationReason::AlreadyRunning, Locale::Hu) => {
            "A webalkalmazás egy példánya már fut vagy indítása folyamatban van.".to_string()
        }
        (PreparationReason::NotWebApp, Locale::En) => {
            "Only web application submissions can be launched.".to_string()
        }
        (PreparationReason::NotWebApp, Locale::Hu) => {
            "Csak webalkalmazás típusú beadás indítható.".to_string()
        }
        (PreparationReason::CompilationFailed, Locale::En) => {
            "The submission failed to compile, so it cannot be launched.".to_string()
        }
        (PreparationReason::CompilationFailed, Locale::Hu) => {
            "A beadás fordítása sikertelen volt, ezért nem indítható.".to_string()
        }
        (PreparationReason::PlatformNotSupported(platform), Locale::En) => {
            format!("Launching web applications is not supported on {}.", platform)
        }
        (PreparationReason::PlatformNotSupported(platform), Locale::Hu) => {
            format!("Webalkalmazás indítása nem támogatott ezen a platformon: {}.", platform)
        }
        (PreparationReason::NoPortsAvailable, Locale::En) => {
            "All ports are reserved at the moment. Please try again later.".to_string()
        }
        (PreparationReason::NoPortsAvailable, Locale::Hu) => {
            "Jelenleg minden port foglalt. Kérjük, próbálja később.".to_string()
        }
        (PreparationReason::InvalidRunInterval, Locale::En) => {
            "The requested run time is not valid.".to_string()
        }
        (PreparationReason::InvalidRunInterval, Locale::Hu) => {
            "A megadott futási idő érvénytelen.".to_string()
        }
    }
}

fn startup_message(kind: RunnerFailureKind, locale: Locale) -> String {
    match (kind, locale) {
        (RunnerFailureKind::Preparation, Locale::En) => {
            "The runtime environment of the web application could not be prepared.".to_string()
        }
        (RunnerFailureKind::Preparation, Locale::Hu) => {
            "A webalkalmazás futtatókörnyezetét nem sikerült előkészíteni.".to_string()
        }
        (RunnerFailureKind::Compile, Locale::En) => {
            "The web application failed to compile.".to_string()
        }
        (RunnerFailureKind::Compile, Locale::Hu) => {
            "A webalkalmazás fordítása sikertelen.".to_string()
        }
        (RunnerFailureKind::Run, Locale::En) => {
            "The web application failed to start.".to_string()
        }
        (RunnerFailureKind::Run, Locale::Hu) => {
            "A webalkalmazás indítása sikertelen.".to_string()
        }
        (RunnerFailureKind::Unknown, Locale::En) => {
            "The web application could not be started for an unknown reason.".to_string()
        }
        (RunnerFailureKind::Unknown, Locale::Hu) => {
            "A webalkalmazás ismeretlen okból nem indítható.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{ExecutionId, Platform};

    #[test]
    fn test_startup_message_uses_sub_reason() {
        let err = LaunchError::Startup {
            kind: RunnerFailureKind::Compile,
            exit_code: Some(1),
            output: "src/main.rs:1: secret path /home/build".to_string(),
        };
        let message = err.user_message(Locale::En);
        assert_eq!(message, "The web application failed to compile.");
        assert!(!message.contains("/home/build"));
    }

    #[test]
    fn test_shutdown_message_hides_internal_detail() {
        let err = LaunchError::Shutdown {
            execution_id: ExecutionId::from("exec-1"),
            message: "connection refused (os error 111)".to_string(),
        };
        assert!(!err.user_message(Locale::Hu).contains("os error"));
        assert!(!err.user_message(Locale::En).contains("os error"));
    }

    #[test]
    fn test_platform_named_in_message() {
        let err = LaunchError::from(PreparationReason::PlatformNotSupported(Platform::Windows));
        assert!(err.user_message(Locale::En).contains("windows"));
    }
}
