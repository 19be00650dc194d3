use kube::discovery::ApiResource;

/// Identifies a resource type on the API server without requiring a compiled Rust type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.into(),
            version: self.version.into(),
            api_version: self.api_version(),
            kind: self.kind.into(),
            plural: self.plural.into(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.plural)
        } else {
            write!(f, "{}.{}", self.plural, self.group)
        }
    }
}

const fn core(kind: &'static str, plural: &'static str, namespaced: bool) -> ResourceKind {
    ResourceKind {
        group: "",
        version: "v1",
        kind,
        plural,
        namespaced,
    }
}

pub const NAMESPACE: ResourceKind = core("Namespace", "namespaces", false);
pub const POD: ResourceKind = core("Pod", "pods", true);
pub const ENDPOINTS: ResourceKind = core("Endpoints", "endpoints", true);

pub const DEPLOYMENT: ResourceKind = ResourceKind {
    group: "apps",
    version: "v1",
    kind: "Deployment",
    plural: "deployments",
    namespaced: true,
};

pub const NETWORK_POLICY: ResourceKind = ResourceKind {
    group: "networking.k8s.io",
    version: "v1",
    kind: "NetworkPolicy",
    plural: "networkpolicies",
    namespaced: true,
};

pub const CRD: ResourceKind = ResourceKind {
    group: "apiextensions.k8s.io",
    version: "v1",
    kind: "CustomResourceDefinition",
    plural: "customresourcedefinitions",
    namespaced: false,
};

pub const VALIDATING_WEBHOOK: ResourceKind = ResourceKind {
    group: "admissionregistration.k8s.io",
    version: "v1",
    kind: "ValidatingWebhookConfiguration",
    plural: "validatingwebhookconfigurations",
    namespaced: false,
};

pub const CLUSTER_VERSION: ResourceKind = ResourceKind {
    group: "config.openshift.io",
    version: "v1",
    kind: "ClusterVersion",
    plural: "clusterversions",
    namespaced: false,
};

pub const INGRESS_CONFIG: ResourceKind = ResourceKind {
    group: "config.openshift.io",
    version: "v1",
    kind: "Ingress",
    plural: "ingresses",
    namespaced: false,
};

pub const FEATURE_GATE: ResourceKind = ResourceKind {
    group: "config.openshift.io",
    version: "v1",
    kind: "FeatureGate",
    plural: "featuregates",
    namespaced: false,
};

pub const CLUSTER_SERVICE_VERSION: ResourceKind = ResourceKind {
    group: "operators.coreos.com",
    version: "v1alpha1",
    kind: "ClusterServiceVersion",
    plural: "clusterserviceversions",
    namespaced: true,
};

pub const GATEWAY: ResourceKind = ResourceKind {
    group: "gateway.networking.k8s.io",
    version: "v1",
    kind: "Gateway",
    plural: "gateways",
    namespaced: true,
};

pub const AUTH_POLICY: ResourceKind = ResourceKind {
    group: "kuadrant.io",
    version: "v1",
    kind: "AuthPolicy",
    plural: "authpolicies",
    namespaced: true,
};

pub const TOKEN_RATE_LIMIT_POLICY: ResourceKind = ResourceKind {
    group: "kuadrant.io",
    version: "v1alpha1",
    kind: "TokenRateLimitPolicy",
    plural: "tokenratelimitpolicies",
    namespaced: true,
};
