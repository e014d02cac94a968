/// A list of possible errors surfaced by the packager core.
///
/// The set is closed on purpose: the embedding host maps each kind to a
/// transport-level outcome (4xx, 5xx, retry) and must not need to inspect
/// message strings. Diagnostic detail is logged at the failure site instead
/// of being carried in the value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
	/// The source media is malformed. Never retried.
	#[error("bad data: {0}")]
	BadData(&'static str),

	/// The request cannot be satisfied by this media, e.g. a clip window
	/// that lies entirely outside the presentation.
	#[error("bad request: {0}")]
	BadRequest(&'static str),

	/// An allocation was refused. Fatal to the request, not the process.
	#[error("allocation failed")]
	AllocFailed,

	/// Cooperative yield: the read cache does not have the requested range
	/// yet. All muxer and encryptor state is preserved; re-invoke the same
	/// operation once the cache reports readiness.
	#[error("again")]
	Again,

	/// Internal size accounting mismatch. A correctness bug; the request
	/// must be aborted, never served best-effort.
	#[error("unexpected: {0}")]
	Unexpected(&'static str),

	/// The sink refused our bytes.
	#[error("io error")]
	Io,
}

pub type Result<T> = std::result::Result<T, Error>;
