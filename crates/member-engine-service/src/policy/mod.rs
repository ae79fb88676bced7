//! 行为策略解析

mod resolver;

pub use resolver::PolicyResolver;
