//! Static resource templates, all keyed by the run-scoped namespace name.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, Namespace, PodSpec, PodTemplateSpec, Probe, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::DynamicObject;
use serde_json::json;

use crate::cluster::route_resource;
use crate::config::Termination;

pub const SERVER_NAME: &str = "ingress-bench-server";
pub const CLIENT_NAME: &str = "ingress-bench-client";
pub const SERVICE_NAME: &str = "ingress-bench-svc";

const SERVER_IMAGE: &str = "quay.io/ingress-bench/nginx:latest";
const CLIENT_IMAGE: &str = "quay.io/ingress-bench/wrk:latest";

pub fn route_name(termination: Termination) -> String {
    format!("ingress-bench-{termination}")
}

pub fn crb_name(ns: &str) -> String {
    format!("ingress-bench-client-{ns}")
}

pub fn server_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), SERVER_NAME.to_string())])
}

pub fn client_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), CLIENT_NAME.to_string())])
}

pub fn namespace(ns: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(ns.to_string()),
            labels: Some(BTreeMap::from([(
                "app".to_string(),
                "ingress-bench".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn server_deployment(_ns: &str) -> Deployment {
    let labels = server_labels();
    Deployment {
        metadata: ObjectMeta {
            name: Some(SERVER_NAME.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "nginx".to_string(),
                        image: Some(SERVER_IMAGE.to_string()),
                        ports: Some(vec![
                            ContainerPort {
                                container_port: 8080,
                                name: Some("http".to_string()),
                                ..Default::default()
                            },
                            ContainerPort {
                                container_port: 8443,
                                name: Some("https".to_string()),
                                ..Default::default()
                            },
                        ]),
                        readiness_probe: Some(Probe {
                            http_get: Some(HTTPGetAction {
                                port: IntOrString::Int(8080),
                                path: Some("/".to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn client_deployment(_ns: &str) -> Deployment {
    let labels = client_labels();
    Deployment {
        metadata: ObjectMeta {
            name: Some(CLIENT_NAME.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "client".to_string(),
                        image: Some(CLIENT_IMAGE.to_string()),
                        // Load generation runs via exec; the container just parks.
                        command: Some(vec!["sleep".to_string(), "inf".to_string()]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service(_ns: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            labels: Some(server_labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(server_labels()),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 8080,
                    target_port: Some(IntOrString::Int(8080)),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("https".to_string()),
                    port: 8443,
                    target_port: Some(IntOrString::Int(8443)),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// One route per termination variant, host left for the router to assign.
pub fn routes(ns: &str) -> Vec<DynamicObject> {
    Termination::ALL.iter().map(|t| route(ns, *t)).collect()
}

pub fn route(ns: &str, termination: Termination) -> DynamicObject {
    let mut route = DynamicObject::new(&route_name(termination), &route_resource()).within(ns);
    route.metadata.labels = Some(BTreeMap::from([(
        "app".to_string(),
        "ingress-bench".to_string(),
    )]));
    let mut spec = json!({
        "port": {"targetPort": termination.target_port()},
        "to": {"kind": "Service", "name": SERVICE_NAME},
    });
    if termination != Termination::Http {
        spec["tls"] = json!({"termination": termination.as_str()});
    }
    route.data = json!({ "spec": spec });
    route
}

pub fn client_crb(ns: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(crb_name(ns)),
            labels: Some(BTreeMap::from([(
                "app".to_string(),
                "ingress-bench".to_string(),
            )])),
            ..Default::default()
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: "default".to_string(),
            namespace: Some(ns.to_string()),
            ..Default::default()
        }]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "cluster-admin".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn service_selects_server_pods() {
        let svc = service("bench");
        let dep = server_deployment("bench");
        assert_eq!(
            svc.spec.unwrap().selector,
            dep.spec.unwrap().selector.match_labels
        );
    }

    #[test]
    fn client_deployment_parks_its_container() {
        let dep = client_deployment("bench");
        let pod = dep.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.containers[0].command.as_deref(),
            Some(&["sleep".to_string(), "inf".to_string()][..])
        );
    }

    #[test]
    fn one_route_per_termination() {
        let routes = routes("bench");
        assert_eq!(routes.len(), 4);
        let names: Vec<_> = routes.iter().map(|r| r.name_any()).collect();
        assert!(names.contains(&"ingress-bench-http".to_string()));
        assert!(names.contains(&"ingress-bench-reencrypt".to_string()));
    }

    #[test]
    fn http_route_has_no_tls_block() {
        let r = route("bench", Termination::Http);
        assert!(r.data["spec"].get("tls").is_none());
        assert_eq!(r.data["spec"]["port"]["targetPort"], 8080);
    }

    #[test]
    fn passthrough_route_targets_tls_port() {
        let r = route("bench", Termination::Passthrough);
        assert_eq!(r.data["spec"]["tls"]["termination"], "passthrough");
        assert_eq!(r.data["spec"]["port"]["targetPort"], 8443);
    }

    #[test]
    fn crb_is_scoped_to_the_namespace() {
        let crb = client_crb("bench-a");
        assert_eq!(crb.metadata.name.as_deref(), Some("ingress-bench-client-bench-a"));
        assert_eq!(crb.subjects.unwrap()[0].namespace.as_deref(), Some("bench-a"));
    }
}
