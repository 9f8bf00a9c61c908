//! Eligibility checks for services requesting a gateway load balancer.
//!
//! [`validate`] is a pure function: it never logs and never touches the
//! gateway.  Accepted-but-ignored settings come back as
//! [`ValidationWarning`]s for the caller to report.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::types::{
    IpFamily, Protocol, Service, ServiceProtocol, ServiceType, SessionAffinity, TargetPort,
    CLUSTER_IP_NONE, LOAD_BALANCER_TYPE_ANNOTATION, UPNP_IGD_LOAD_BALANCER_TYPE,
};

/// Why a service cannot get a gateway load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing '{}' annotation", LOAD_BALANCER_TYPE_ANNOTATION)]
    MissingTypeAnnotation,

    #[error("unsupported load balancer type (annotation '{}={}')", LOAD_BALANCER_TYPE_ANNOTATION, .0)]
    UnsupportedType(String),

    #[error("ServiceType must be 'LoadBalancer', not '{0:?}'")]
    NotLoadBalancer(ServiceType),

    #[error("ClusterIP must not be '{}'", CLUSTER_IP_NONE)]
    Headless,

    #[error("PublishNotReadyAddresses must be false")]
    PublishNotReadyAddresses,

    #[error("IPFamily must be IPv4: IPFamily '{0:?}' not supported")]
    UnsupportedIpFamily(IpFamily),

    #[error("SessionAffinity must be None: SessionAffinity '{0:?}' not supported")]
    UnsupportedSessionAffinity(SessionAffinity),

    #[error("port mapping for port {port}: unsupported protocol {protocol}")]
    UnsupportedProtocol {
        port: String,
        protocol: ServiceProtocol,
    },

    #[error("port mapping for port {port}: unsupported TargetPort type String ('{target}')")]
    NamedTargetPort { port: String, target: String },

    #[error("port mapping for port {0}: a valid NodePort must be declared")]
    MissingNodePort(String),

    #[error("port mapping for port {0}: a valid Port must be declared")]
    MissingPort(String),

    #[error("port mapping for port {port}: {protocol} port {external_port} is declared twice")]
    DuplicateExternalPort {
        port: String,
        protocol: Protocol,
        external_port: u16,
    },
}

/// A setting that was accepted but has no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    IgnoredLoadBalancerIp(String),
    /// Source ranges are not enforced: clients may connect from anywhere.
    IgnoredSourceRanges(Vec<String>),
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::IgnoredLoadBalancerIp(ip) => {
                write!(f, "ignoring LoadBalancerIP: '{}'", ip)
            }
            ValidationWarning::IgnoredSourceRanges(ranges) => write!(
                f,
                "security warning: ignoring load balancer source range restrictions {:?} \
                 (not implemented): clients may connect from any IP address",
                ranges
            ),
        }
    }
}

/// Checks that `service` can be served by the gateway.
///
/// Checks run in a fixed order and the first failing one is reported.
pub fn validate(service: &Service) -> Result<Vec<ValidationWarning>, Rejection> {
    let spec = &service.spec;

    match service.metadata.annotations.get(LOAD_BALANCER_TYPE_ANNOTATION) {
        None => return Err(Rejection::MissingTypeAnnotation),
        Some(lb_type) if lb_type != UPNP_IGD_LOAD_BALANCER_TYPE => {
            return Err(Rejection::UnsupportedType(lb_type.clone()))
        }
        Some(_) => {}
    }
    if spec.type_ != ServiceType::LoadBalancer {
        return Err(Rejection::NotLoadBalancer(spec.type_));
    }
    if spec.cluster_ip.as_deref() == Some(CLUSTER_IP_NONE) {
        return Err(Rejection::Headless);
    }
    if spec.publish_not_ready_addresses {
        return Err(Rejection::PublishNotReadyAddresses);
    }
    if let Some(family) = spec.ip_family {
        if family != IpFamily::Ipv4 {
            return Err(Rejection::UnsupportedIpFamily(family));
        }
    }
    if spec.session_affinity != SessionAffinity::None {
        return Err(Rejection::UnsupportedSessionAffinity(spec.session_affinity));
    }

    let mut warnings = Vec::new();
    if let Some(ip) = spec.load_balancer_ip.as_ref().filter(|ip| !ip.is_empty()) {
        warnings.push(ValidationWarning::IgnoredLoadBalancerIp(ip.clone()));
    }
    if !spec.load_balancer_source_ranges.is_empty() {
        warnings.push(ValidationWarning::IgnoredSourceRanges(
            spec.load_balancer_source_ranges.clone(),
        ));
    }

    let mut external = HashSet::new();
    for port in &spec.ports {
        let protocol = Protocol::try_from(port.protocol).map_err(|protocol| {
            Rejection::UnsupportedProtocol {
                port: port.name.clone(),
                protocol,
            }
        })?;
        if let Some(TargetPort::Name(target)) = &port.target_port {
            return Err(Rejection::NamedTargetPort {
                port: port.name.clone(),
                target: target.clone(),
            });
        }
        if port.node_port == 0 {
            return Err(Rejection::MissingNodePort(port.name.clone()));
        }
        if port.port == 0 {
            return Err(Rejection::MissingPort(port.name.clone()));
        }
        // The device keys mappings by (protocol, external port).
        if !external.insert((protocol, port.port)) {
            return Err(Rejection::DuplicateExternalPort {
                port: port.name.clone(),
                protocol,
                external_port: port.port,
            });
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectMeta, ServicePort, ServiceSpec};

    fn service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: "my-service".into(),
                namespace: "default".into(),
                annotations: [(
                    LOAD_BALANCER_TYPE_ANNOTATION.to_string(),
                    UPNP_IGD_LOAD_BALANCER_TYPE.to_string(),
                )]
                .into_iter()
                .collect(),
            },
            spec: ServiceSpec {
                type_: ServiceType::LoadBalancer,
                cluster_ip: Some("10.96.0.10".into()),
                ports: vec![ServicePort {
                    name: "http".into(),
                    protocol: ServiceProtocol::Tcp,
                    port: 8080,
                    node_port: 30080,
                    target_port: Some(TargetPort::Number(80)),
                }],
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_accepts_eligible_service() {
        assert_eq!(validate(&service()), Ok(vec![]));
    }

    #[test]
    fn test_missing_annotation() {
        let mut svc = service();
        svc.metadata.annotations.clear();
        assert_eq!(validate(&svc), Err(Rejection::MissingTypeAnnotation));
    }

    #[test]
    fn test_unsupported_annotation_value() {
        let mut svc = service();
        svc.metadata
            .annotations
            .insert(LOAD_BALANCER_TYPE_ANNOTATION.into(), "metallb".into());
        assert_eq!(
            validate(&svc),
            Err(Rejection::UnsupportedType("metallb".into()))
        );
    }

    #[test]
    fn test_service_type_must_be_load_balancer() {
        let mut svc = service();
        svc.spec.type_ = ServiceType::NodePort;
        assert_eq!(
            validate(&svc),
            Err(Rejection::NotLoadBalancer(ServiceType::NodePort))
        );
    }

    #[test]
    fn test_headless_service() {
        let mut svc = service();
        svc.spec.cluster_ip = Some(CLUSTER_IP_NONE.into());
        assert_eq!(validate(&svc), Err(Rejection::Headless));
    }

    #[test]
    fn test_publish_not_ready_addresses() {
        let mut svc = service();
        svc.spec.publish_not_ready_addresses = true;
        assert_eq!(validate(&svc), Err(Rejection::PublishNotReadyAddresses));
    }

    #[test]
    fn test_ip_family() {
        let mut svc = service();
        svc.spec.ip_family = Some(IpFamily::Ipv4);
        assert!(validate(&svc).is_ok());
        svc.spec.ip_family = Some(IpFamily::Ipv6);
        assert_eq!(
            validate(&svc),
            Err(Rejection::UnsupportedIpFamily(IpFamily::Ipv6))
        );
    }

    #[test]
    fn test_session_affinity() {
        let mut svc = service();
        svc.spec.session_affinity = SessionAffinity::ClientIp;
        assert_eq!(
            validate(&svc),
            Err(Rejection::UnsupportedSessionAffinity(SessionAffinity::ClientIp))
        );
    }

    #[test]
    fn test_checks_run_in_order() {
        let mut svc = service();
        svc.spec.type_ = ServiceType::ClusterIp;
        svc.spec.session_affinity = SessionAffinity::ClientIp;
        svc.metadata.annotations.clear();
        assert_eq!(validate(&svc), Err(Rejection::MissingTypeAnnotation));
    }

    #[test]
    fn test_ignored_settings_produce_warnings() {
        let mut svc = service();
        svc.spec.load_balancer_ip = Some("203.0.113.7".into());
        svc.spec.load_balancer_source_ranges = vec!["192.0.2.0/24".into()];
        assert_eq!(
            validate(&svc),
            Ok(vec![
                ValidationWarning::IgnoredLoadBalancerIp("203.0.113.7".into()),
                ValidationWarning::IgnoredSourceRanges(vec!["192.0.2.0/24".into()]),
            ])
        );
    }

    #[test]
    fn test_empty_load_balancer_ip_is_not_a_warning() {
        let mut svc = service();
        svc.spec.load_balancer_ip = Some(String::new());
        assert_eq!(validate(&svc), Ok(vec![]));
    }

    #[test]
    fn test_sctp_port() {
        let mut svc = service();
        svc.spec.ports[0].protocol = ServiceProtocol::Sctp;
        assert_eq!(
            validate(&svc),
            Err(Rejection::UnsupportedProtocol {
                port: "http".into(),
                protocol: ServiceProtocol::Sctp,
            })
        );
    }

    #[test]
    fn test_named_target_port() {
        let mut svc = service();
        svc.spec.ports[0].target_port = Some(TargetPort::Name("web".into()));
        assert_eq!(
            validate(&svc),
            Err(Rejection::NamedTargetPort {
                port: "http".into(),
                target: "web".into(),
            })
        );
    }

    #[test]
    fn test_zero_node_port() {
        let mut svc = service();
        svc.spec.ports[0].node_port = 0;
        assert_eq!(
            validate(&svc),
            Err(Rejection::MissingNodePort("http".into()))
        );
    }

    #[test]
    fn test_zero_port() {
        let mut svc = service();
        svc.spec.ports[0].port = 0;
        assert_eq!(validate(&svc), Err(Rejection::MissingPort("http".into())));
    }

    #[test]
    fn test_duplicate_external_port() {
        let mut svc = service();
        let mut second = svc.spec.ports[0].clone();
        second.name = "alt".into();
        second.node_port = 30081;
        svc.spec.ports.push(second.clone());
        assert_eq!(
            validate(&svc),
            Err(Rejection::DuplicateExternalPort {
                port: "alt".into(),
                protocol: Protocol::Tcp,
                external_port: 8080,
            })
        );

        // Same port number over UDP is a different mapping.
        svc.spec.ports[1].protocol = ServiceProtocol::Udp;
        assert!(validate(&svc).is_ok());
    }
}
