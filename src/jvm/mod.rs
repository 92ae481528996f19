//! Verify JVM classes
//!
//! ### Simple example
//!
//! Consider verifying the classes of an application against a few core library classes:
//!
//! ```no_run
//! use preverifier::jvm::class_file::ClassFile;
//! use preverifier::jvm::class_graph::*;
//! use preverifier::jvm::verifier::{VerifierSession, VerifierSettings};
//! use preverifier::jvm::Error;
//!
//! # fn verify() -> Result<(), Error> {
//! // Setup the class graph, add in Java standard library types
//! let class_graph_arenas = ClassGraphArenas::new();
//! let class_graph = ClassGraph::new(&class_graph_arenas);
//! class_graph.insert_java_library_types();
//!
//! // Make the application classes known before verifying any of them
//! let mut class = ClassFile::read_from_path("me/alec/Point.class")?;
//! for err in class_graph.add_class_files(std::slice::from_ref(&class)) {
//!     eprintln!("{}", err);
//! }
//!
//! // Verify, then attach the stack maps to the class
//! let session = VerifierSession::new(&class_graph, VerifierSettings::default());
//! let verified = session.verify_class(&class)?;
//! verified.attach_to(&mut class)?;
//! class.save_to_path("output/me/alec/Point.class", true)?;
//! # Ok(())
//! # }
//! ```

mod access_flags;
mod binary_format;
pub mod class_file;
pub mod class_graph;
mod descriptors;
mod errors;
mod names;
pub mod rewrite;
pub mod verifier;

pub use access_flags::*;
pub use binary_format::{Deserialize, Serialize};
pub use descriptors::*;
pub use errors::*;
pub use names::*;
