//! Hosting provider access: credentials, pull requests, and secrets.

pub mod client;
pub mod credentials;
pub mod secrets;

pub use client::{
    ApiRequest, ApiResponse, HostingApi, HostingClient, HttpTransport, Method, PullRequest,
    PullRequestOutcome, RepoEndpoint, ReqwestTransport, API_URL_ENV, DEFAULT_API_BASE,
};
pub use credentials::{CredentialPrompt, CredentialStore, Credentials};
pub use secrets::{secret_name, RepoPublicKey, SealedSecret, SecretSealer, UnsupportedSealer};
