//! Injection and instantiation
//!
//! Injection points are plain data: an [`InjectionMetadata`] table built once
//! per type (by hand, or by `#[derive(Injectable)]`). Resolution walks the
//! table in declaration order, resolving each point against the requesting
//! context, and hands the results to the type's constructor.

mod getter;
mod injectable;
mod metadata;
mod resolver;

pub use getter::Getter;
pub use injectable::{Injectable, Provider, ValueFactory};
pub use metadata::{
    Injection, InjectionMetadata, InjectionMetadataBuilder, InjectionPoint, Member, MethodMetadata,
    MethodMetadataBuilder, short_type_name,
};
pub use resolver::{FromInjected, Injected, InjectedArgs, InjectedSlot, instantiate};
pub(crate) use resolver::{class_source, provider_source, value_factory_source};
