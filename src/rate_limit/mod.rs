// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 限流模块
//!
//! 按标识符计数的固定窗口限流。标识符的派生方式可替换：来源地址、
//! 认证主体或方法 + 路径 + 主体的组合。

pub mod identifier;
pub mod limiter;
pub mod middleware;

pub use identifier::{
    IdentifierFn, IdentifierStrategy, PRINCIPAL_HEADER, Principal, RequestIdentity,
    TrustedHeaders,
};
pub use limiter::{RateLimitDecision, RateLimitPolicy, RateLimiter, RateWindow};
pub use middleware::{RateLimitState, rate_limit_middleware};
