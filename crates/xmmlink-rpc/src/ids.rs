//! Command codes used by xmmlink.
//!
//! The firmware exposes several hundred commands. Only the ones the bring-up
//! sequence needs are named here; anything else can still be sent by raw
//! code.

use std::fmt;

macro_rules! code_table {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $code:expr,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Every entry of the table.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Numeric command code.
            pub const fn code(self) -> u32 {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            /// Firmware name.
            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)+
                }
            }

            /// Look up an entry by code.
            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $(c if c == $code => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Look up an entry by firmware name.
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|id| id.name() == name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> u32 {
                id.code()
            }
        }
    };
}

code_table! {
    /// Calls issued by the host.
    pub enum CallId {
        UtaMsSmsInit = 0x025,
        UtaMsCbsInit = 0x026,
        UtaMsNetOpen = 0x029,
        UtaMsCallCsInit = 0x02d,
        UtaMsCallPsInitialize = 0x031,
        UtaMsSsInit = 0x032,
        UtaMsSimOpenReq = 0x036,
        UtaModeSetReq = 0x059,
        UtaMsNetAttachReq = 0x0a2,
        UtaMsCallPsAttachApnConfigReq = 0x0d7,
        UtaMsCallPsGetNegIpAddrReq = 0x0e2,
        UtaMsCallPsGetNegotiatedDnsReq = 0x0e4,
        UtaMsCallPsConnectReq = 0x0eb,
        UtaRPCPsConnectToDatachannelReq = 0x11e,
        UtaRPCPSConnectSetupReq = 0x121,
        CsiFccLockQueryReq = 0x17b,
        CsiFccLockGenChallengeReq = 0x17d,
        CsiFccLockVerChallengeReq = 0x17f,
    }
}

code_table! {
    /// Notifications pushed by the modem.
    pub enum UnsolicitedId {
        UtaMsSimInitIndCb = 0x0de,
        UtaModeSetRspCb = 0x105,
        UtaMsNetIsAttachAllowedIndCb = 0x10b,
        UtaMsNetRegStateIndCb = 0x110,
        UtaMsCallPsConnectStatusIndCb = 0x124,
    }
}
