//! The fixed MaaS deployment plan.

use std::time::Duration;

use crate::cluster::kinds;
use crate::deployer::Error;
use crate::poll::{PollSpec, WaitTarget};
use crate::stage::{Action, StageSpec};

/// Platform release that ships Gateway API without feature gates.
pub const GATEWAY_API_MINIMUM: &str = "4.19.9";
/// Feature gates reconcile with no completion signal; wait this long after patching.
pub const FEATURE_GATE_SETTLE: Duration = Duration::from_secs(30);

pub const POLICY_NAMESPACE: &str = "kuadrant-system";
pub const POLICY_OPERATOR: &str = "kuadrant-operator-controller-manager";
pub const GATEWAY_NAMESPACE: &str = "openshift-ingress";
pub const GATEWAY_NAME: &str = "openshift-ai-inference";

const POLICY_CRDS: [&str; 4] = [
    "kuadrants.kuadrant.io",
    "authpolicies.kuadrant.io",
    "ratelimitpolicies.kuadrant.io",
    "tokenratelimitpolicies.kuadrant.io",
];
const POLICY_INSTALLS: [&str; 3] = ["kuadrant-operator", "authorino-operator", "limitador-operator"];

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn crd(name: &str) -> Result<PollSpec, Error> {
    PollSpec::new(
        WaitTarget::CrdEstablished { name: name.into() },
        secs(300),
        secs(5),
    )
}

fn install(namespace: &str, name: &str) -> Result<PollSpec, Error> {
    PollSpec::new(
        WaitTarget::InstallSucceeded {
            namespace: namespace.into(),
            name: name.into(),
        },
        secs(600),
        secs(10),
    )
}

fn pods(namespace: &str) -> Result<PollSpec, Error> {
    PollSpec::new(
        WaitTarget::PodsReady {
            namespace: namespace.into(),
        },
        secs(300),
        secs(5),
    )
}

fn webhooks(namespace: &str) -> Result<PollSpec, Error> {
    PollSpec::new(
        WaitTarget::WebhookEndpoints {
            namespace: namespace.into(),
        },
        secs(120),
        secs(5),
    )
}

fn rollout(namespace: &str, name: &str) -> Result<PollSpec, Error> {
    PollSpec::new(
        WaitTarget::RolloutComplete {
            namespace: namespace.into(),
            name: name.into(),
        },
        secs(180),
        secs(5),
    )
}

fn gateway_programmed() -> Result<PollSpec, Error> {
    PollSpec::new(
        WaitTarget::Condition {
            kind: kinds::GATEWAY,
            namespace: Some(GATEWAY_NAMESPACE.into()),
            name: GATEWAY_NAME.into(),
            condition: "Programmed".into(),
        },
        secs(300),
        secs(10),
    )
}

pub fn stages() -> Result<Vec<StageSpec>, Error> {
    let mut policy_readiness = StageSpec::new("policy-operator-readiness").after(&["policy-operators"]);
    for name in POLICY_INSTALLS {
        policy_readiness = policy_readiness.wait(install(POLICY_NAMESPACE, name)?);
    }
    for name in POLICY_CRDS {
        policy_readiness = policy_readiness.wait(crd(name)?);
    }
    policy_readiness = policy_readiness
        .wait(pods(POLICY_NAMESPACE)?)
        .wait(webhooks(POLICY_NAMESPACE)?);

    Ok(vec![
        StageSpec::new("verify-platform")
            .abort_on_failure()
            .action(Action::VerifyPlatform),
        StageSpec::new("resolve-cluster-domain")
            .after(&["verify-platform"])
            .abort_on_failure()
            .action(Action::ResolveClusterDomain),
        StageSpec::new("feature-gates")
            .after(&["resolve-cluster-domain"])
            .action(Action::FeatureGates {
                minimum: GATEWAY_API_MINIMUM,
                settle: FEATURE_GATE_SETTLE,
            }),
        StageSpec::new("namespaces")
            .after(&["feature-gates"])
            .action(Action::CreateNamespaces(vec!["llm", POLICY_NAMESPACE, "maas-api"])),
        StageSpec::new("cert-manager")
            .after(&["namespaces"])
            .action(Action::Apply("cert-manager"))
            .wait(crd("certificates.cert-manager.io")?)
            .wait(pods("cert-manager")?)
            .wait(webhooks("cert-manager")?),
        StageSpec::new("policy-operators")
            .after(&["cert-manager"])
            .action(Action::Apply("kuadrant-operators")),
        StageSpec::new("gateway-infrastructure")
            .after(&["policy-operators"])
            .action(Action::Apply("gateway")),
        StageSpec::new("serving-platform")
            .after(&["gateway-infrastructure"])
            .action(Action::InstallIfAbsent {
                crd: "llminferenceservices.serving.kserve.io",
                bundle: "kserve",
            })
            .wait(crd("llminferenceservices.serving.kserve.io")?),
        policy_readiness,
        StageSpec::new("policy-configuration")
            .after(&["policy-operator-readiness"])
            .action(Action::Apply("kuadrant")),
        StageSpec::new("api-layer")
            .after(&["policy-configuration"])
            .action(Action::Apply("maas-api"))
            .wait(pods("maas-api")?),
        StageSpec::new("policy-operator-restart")
            .after(&["api-layer"])
            .action(Action::RolloutRestart {
                namespace: POLICY_NAMESPACE,
                name: POLICY_OPERATOR,
            })
            .wait(rollout(POLICY_NAMESPACE, POLICY_OPERATOR)?),
        StageSpec::new("mesh-crds")
            .after(&["gateway-infrastructure"])
            .wait(crd("envoyfilters.networking.istio.io")?),
        StageSpec::new("gateway-programmed")
            .after(&["mesh-crds"])
            .wait(gateway_programmed()?),
        StageSpec::new("gateway-policies")
            .after(&["gateway-programmed", "policy-configuration"])
            .action(Action::Apply("gateway-policies")),
        StageSpec::new("post-deploy")
            .after(&["gateway-policies"])
            .action(Action::PostDeploy),
        StageSpec::new("observability")
            .after(&["post-deploy"])
            .action(Action::Apply("observability")),
        StageSpec::new("status-report")
            .after(&["observability"])
            .action(Action::Report),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::order;
    use crate::stage::FailurePolicy;

    fn planned() -> Vec<&'static str> {
        let stages = stages().unwrap();
        order(&stages)
            .unwrap()
            .into_iter()
            .map(|i| stages[i].name)
            .collect()
    }

    fn position(order: &[&str], name: &str) -> usize {
        order.iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn plan_runs_in_declaration_order() {
        assert_eq!(
            planned(),
            vec![
                "verify-platform",
                "resolve-cluster-domain",
                "feature-gates",
                "namespaces",
                "cert-manager",
                "policy-operators",
                "gateway-infrastructure",
                "serving-platform",
                "policy-operator-readiness",
                "policy-configuration",
                "api-layer",
                "policy-operator-restart",
                "mesh-crds",
                "gateway-programmed",
                "gateway-policies",
                "post-deploy",
                "observability",
                "status-report",
            ]
        );
    }

    #[test]
    fn policy_configuration_follows_crd_readiness() {
        let order = planned();
        assert!(position(&order, "policy-operator-readiness") < position(&order, "policy-configuration"));
        assert!(position(&order, "gateway-programmed") < position(&order, "gateway-policies"));
        assert!(position(&order, "resolve-cluster-domain") < position(&order, "namespaces"));
    }

    #[test]
    fn only_platform_and_domain_checks_abort() {
        let aborting: Vec<&str> = stages()
            .unwrap()
            .iter()
            .filter(|s| s.policy == FailurePolicy::Abort)
            .map(|s| s.name)
            .collect();
        assert_eq!(aborting, vec!["verify-platform", "resolve-cluster-domain"]);
    }

    #[test]
    fn policy_readiness_checks_installs_before_crds() {
        let stages = stages().unwrap();
        let readiness = stages
            .iter()
            .find(|s| s.name == "policy-operator-readiness")
            .unwrap();
        let targets: Vec<String> = readiness.waits.iter().map(|w| w.target().to_string()).collect();
        assert_eq!(targets.len(), 9);
        assert!(targets[0].starts_with("install"));
        assert!(targets[3].starts_with("CRD kuadrants.kuadrant.io"));
        assert_eq!(targets[8], "webhook endpoints in kuadrant-system ready");
    }
}
