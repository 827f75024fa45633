//! Mesh virtual-route custom resource
//!
//! Minimal Istio `VirtualService` surface: one host routed to one
//! in-cluster service port.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize)]
#[kube(
    group = "networking.istio.io",
    version = "v1beta1",
    kind = "VirtualService",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    pub hosts: Vec<String>,
    pub gateways: Vec<String>,
    pub http: Vec<HttpRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRoute {
    pub route: Vec<HttpRouteDestination>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRouteDestination {
    pub destination: Destination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub host: String,
    pub port: PortSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSelector {
    pub number: u32,
}

impl VirtualServiceSpec {
    /// Route `hostname` through `gateway` onto `service:port`.
    pub fn single_route(hostname: &str, gateway: &str, service: &str, port: u16) -> Self {
        VirtualServiceSpec {
            hosts: vec![hostname.to_string()],
            gateways: vec![gateway.to_string()],
            http: vec![HttpRoute {
                route: vec![HttpRouteDestination {
                    destination: Destination {
                        host: service.to_string(),
                        port: PortSelector {
                            number: u32::from(port),
                        },
                    },
                }],
            }],
        }
    }
}
