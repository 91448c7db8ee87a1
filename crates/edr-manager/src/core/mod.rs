//! Issuer side of the refresh-token grant

mod issuer;
mod validation;

pub use issuer::{IssuerError, TokenIssuer};
pub use validation::{
    AudienceMatchesParticipantRule, AuthTokenAudienceRule, ClaimPresenceRule, IssuerEqualsSubjectRule,
    NotExpiredRule, RefreshTokenMustExistRule, RuleChain, TokenValidationRule, ValidationContext,
    ValidationError,
};
