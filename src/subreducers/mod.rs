// Copyright 2025 Cowboy AI, LLC.

//! Built-in workflow handlers

pub mod document_regeneration;

pub use document_regeneration::{
    DocumentFormat, DocumentGenerator, DocumentRegenerationSubreducer, DocumentRequest,
    RegeneratedDocument, TemplateDocumentGenerator,
};
