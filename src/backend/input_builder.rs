use crate::backend::QuotaInput;
use crate::{Error, Quota};
use actix_web::dev::ServiceRequest;
use std::future::{ready, Ready};
use std::net::{IpAddr, Ipv6Addr};

type CustomFn = Box<dyn Fn(&ServiceRequest) -> Result<String, actix_web::Error>>;

pub type QuotaInputFuture = Ready<Result<QuotaInput, actix_web::Error>>;

/// Utility to create an input function that applies one [Quota] to every request.
///
/// The key is assembled from the enabled components, in the order: custom key, real IP,
/// peer IP, path, custom function; joined with `-`. Give each guarded operation its own
/// [QuotaInputBuilder::custom_key] (e.g. `"invite"`, `"login"`) when they share a backend.
pub struct QuotaInputBuilder {
    quota: Quota,
    real_ip_key: bool,
    peer_ip_key: bool,
    path_key: bool,
    custom_key: Option<String>,
    custom_fn: Option<CustomFn>,
}

impl QuotaInputBuilder {
    pub fn new(quota: Quota) -> Self {
        Self {
            quota,
            real_ip_key: false,
            peer_ip_key: false,
            path_key: false,
            custom_key: None,
            custom_fn: None,
        }
    }

    /// Adds the client's real IP to the rate limiting key.
    ///
    /// # Security
    ///
    /// This calls
    /// [ConnectionInfo::realip_remote_addr()](actix_web::dev::ConnectionInfo::realip_remote_addr)
    /// internally which is only suitable for applications deployed behind a proxy that you
    /// control.
    ///
    /// # IPv6
    ///
    /// IPv6 addresses will be grouped into a single key per /64
    pub fn real_ip_key(mut self) -> Self {
        self.real_ip_key = true;
        self
    }

    /// Adds the connection peer IP to the rate limiting key.
    ///
    /// This is suitable when clients connect directly to the application.
    ///
    /// # IPv6
    ///
    /// IPv6 addresses will be grouped into a single key per /64
    pub fn peer_ip_key(mut self) -> Self {
        self.peer_ip_key = true;
        self
    }

    /// Add the request path to the rate limiting key
    pub fn path_key(mut self) -> Self {
        self.path_key = true;
        self
    }

    /// Add a fixed namespace to the rate limiting key
    pub fn custom_key(mut self, key: &str) -> Self {
        self.custom_key = Some(key.to_owned());
        self
    }

    /// Dynamically add a custom component to the rate limiting key, e.g. an account id
    pub fn custom_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Result<String, actix_web::Error> + 'static,
    {
        self.custom_fn = Some(Box::new(f));
        self
    }

    pub fn build(self) -> impl Fn(&ServiceRequest) -> QuotaInputFuture + 'static {
        move |req| ready(self.input(req))
    }

    fn input(&self, req: &ServiceRequest) -> Result<QuotaInput, actix_web::Error> {
        let mut components = Vec::new();
        if let Some(custom) = &self.custom_key {
            components.push(custom.clone());
        }
        if self.real_ip_key || self.peer_ip_key {
            let info = req.connection_info();
            if self.real_ip_key {
                let addr = info.realip_remote_addr().ok_or(Error::MissingRemoteAddr)?;
                components.push(ip_key(addr)?);
            }
            if self.peer_ip_key {
                let addr = info.peer_addr().ok_or(Error::MissingRemoteAddr)?;
                components.push(ip_key(addr)?);
            }
        }
        if self.path_key {
            components.push(req.path().to_owned());
        }
        if let Some(f) = &self.custom_fn {
            components.push(f(req)?);
        }
        Ok(QuotaInput {
            quota: self.quota,
            key: components.join("-"),
        })
    }
}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
fn ip_key(addr: &str) -> Result<String, Error> {
    let ip = strip_port(addr).parse::<IpAddr>()?;
    Ok(match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => {
                let s = v6.segments();
                let subnet = Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, 0);
                format!("{subnet}/64")
            }
        },
    })
}

// Forwarded headers may carry `1.2.3.4:5678` or `[::1]:5678`.
fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, _port)) if !host.contains(':') => host,
        _ => addr,
    }
}
