// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::extract::{ConnectInfo, Request};
use axum::http::Method;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::config::IdentifierChoice;

/// 上游身份服务写入的主体标识头
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// 已认证主体，可由前置中间件放入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// 可以采信的客户端请求头
///
/// 两者都由客户端控制，只有部署在会覆盖这些头的代理之后才应开启。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrustedHeaders {
    /// 从 `X-Forwarded-For` 读取来源地址
    pub forwarded_for: bool,
    /// 从 [`PRINCIPAL_HEADER`] 读取主体
    pub principal: bool,
}

/// 派生限流标识所需的请求信息
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub method: Method,
    pub path: String,
    pub addr: Option<IpAddr>,
    pub principal: Option<String>,
}

impl RequestIdentity {
    pub fn from_request(request: &Request, trusted: TrustedHeaders) -> Self {
        let forwarded = trusted
            .forwarded_for
            .then(|| {
                request
                    .headers()
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .and_then(|v| v.trim().parse::<IpAddr>().ok())
            })
            .flatten();

        let addr = forwarded.or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });

        let principal = request
            .extensions()
            .get::<Principal>()
            .map(|p| p.0.clone())
            .or_else(|| {
                trusted
                    .principal
                    .then(|| {
                        request
                            .headers()
                            .get(PRINCIPAL_HEADER)
                            .and_then(|v| v.to_str().ok())
                            .map(str::trim)
                            .filter(|v| !v.is_empty())
                            .map(str::to_string)
                    })
                    .flatten()
            });

        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            addr,
            principal,
        }
    }

    fn addr_label(&self) -> String {
        self.addr
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// 标识符派生函数
pub type IdentifierFn = Arc<dyn Fn(&RequestIdentity) -> String + Send + Sync>;

/// 内置的标识符派生方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierStrategy {
    /// 按来源地址
    SourceAddress,
    /// 按认证主体，缺失时退回来源地址
    Principal,
    /// 方法 + 路径 + 主体（或地址）
    Composite,
}

impl IdentifierStrategy {
    pub fn identify(&self, identity: &RequestIdentity) -> String {
        match self {
            IdentifierStrategy::SourceAddress => format!("ip:{}", identity.addr_label()),
            IdentifierStrategy::Principal => match &identity.principal {
                Some(principal) => format!("user:{}", principal),
                None => format!("ip:{}", identity.addr_label()),
            },
            IdentifierStrategy::Composite => {
                let who = match &identity.principal {
                    Some(principal) => format!("user:{}", principal),
                    None => format!("ip:{}", identity.addr_label()),
                };
                format!("{}:{}:{}", identity.method, identity.path, who)
            }
        }
    }

    pub fn into_fn(self) -> IdentifierFn {
        Arc::new(move |identity| self.identify(identity))
    }
}

impl From<IdentifierChoice> for IdentifierStrategy {
    fn from(choice: IdentifierChoice) -> Self {
        match choice {
            IdentifierChoice::Ip => IdentifierStrategy::SourceAddress,
            IdentifierChoice::Principal => IdentifierStrategy::Principal,
            IdentifierChoice::Composite => IdentifierStrategy::Composite,
        }
    }
}
