//! User-facing messages for access outcomes
//!
//! Messages are in Portuguese (Brazilian), the language of the lock
//! network's customers, and kept ASCII-only so they render the same on
//! every client.
//!
//! # Usage
//!
//! ```
//! use relaylock_access::messages::AccessMessages;
//!
//! assert_eq!(AccessMessages::LOCK_NOT_FOUND, "Trava nao encontrada");
//! ```

/// Messages shown to the person requesting access
pub struct AccessMessages;

impl AccessMessages {
    /// Access granted, lock released
    pub const ACCESS_GRANTED: &'static str = "Acesso liberado";

    /// No lock matches the code or QR token
    pub const LOCK_NOT_FOUND: &'static str = "Trava nao encontrada";

    /// The requesting user does not exist
    pub const USER_NOT_FOUND: &'static str = "Usuario nao encontrado";

    /// User is administratively disabled
    pub const USER_BLOCKED: &'static str =
        "Este usuario esta bloqueado e nao pode realizar esta acao";

    /// Personalized lock, user not on the list
    pub const ACCESS_RESTRICTED: &'static str =
        "Esta trava e restrita para usuarios especificos";

    /// Age-restricted lock, user under 18
    pub const AGE_RESTRICTED: &'static str =
        "Esta trava e permitida apenas para maiores de 18 anos";

    /// Lock switched off as a product
    pub const LOCK_INACTIVE: &'static str = "Esta trava esta inativa e nao pode ser utilizada";

    /// Another access is using the lock
    pub const CONCURRENT_ACCESS_IN_PROGRESS: &'static str =
        "Trava em uso, aguarde o fim da liberacao";

    /// Smart plug unreachable
    pub const DEVICE_OFFLINE: &'static str = "A tomada esta offline";

    /// Smart plug did not confirm the command
    pub const DEVICE_COMMAND_FAILED: &'static str = "Falha ao acionar a trava";

    /// Lock left open after a failed re-arm, waiting for maintenance
    pub const REARM_FAILED_DEGRADED: &'static str = "Trava em manutencao";

    /// Infrastructure failure
    pub const INTERNAL_ERROR: &'static str = "Erro interno, tente novamente";
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [&str; 12] = [
        AccessMessages::ACCESS_GRANTED,
        AccessMessages::LOCK_NOT_FOUND,
        AccessMessages::USER_NOT_FOUND,
        AccessMessages::USER_BLOCKED,
        AccessMessages::ACCESS_RESTRICTED,
        AccessMessages::AGE_RESTRICTED,
        AccessMessages::LOCK_INACTIVE,
        AccessMessages::CONCURRENT_ACCESS_IN_PROGRESS,
        AccessMessages::DEVICE_OFFLINE,
        AccessMessages::DEVICE_COMMAND_FAILED,
        AccessMessages::REARM_FAILED_DEGRADED,
        AccessMessages::INTERNAL_ERROR,
    ];

    #[test]
    fn test_messages_are_non_empty() {
        for message in ALL {
            assert!(!message.is_empty());
        }
    }

    #[test]
    fn test_messages_are_ascii() {
        for message in ALL {
            assert!(message.is_ascii(), "non-ASCII message: {message}");
        }
    }
}
