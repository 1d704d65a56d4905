//! # Container runtime selection

use crate::controller::reconciler::version::{KubeVersion, CONTAINERD_MIN_VERSION};
use crate::crd::{CriSpec, CriType};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cri type {cri} is allowed only for kubernetes 1.19+")]
pub struct UnsupportedCri {
    pub cri: CriType,
}

/// Runtime a group's nodes are bootstrapped with
///
/// The group's own `cri.type` wins, then the cluster-wide `defaultCRI`, then
/// the built-in default (Containerd, or Docker before 1.19). A Docker runtime
/// the operator asked not to manage becomes `NotManaged`.
pub fn resolve_cri(
    spec: Option<&CriSpec>,
    cluster_default: Option<CriType>,
    version: KubeVersion,
) -> Result<CriType, UnsupportedCri> {
    let builtin = if version < CONTAINERD_MIN_VERSION {
        CriType::Docker
    } else {
        CriType::Containerd
    };

    let cri = spec
        .and_then(|s| s.cri_type)
        .or(cluster_default)
        .unwrap_or(builtin);

    match cri {
        CriType::Docker => {
            let unmanaged = spec
                .and_then(|s| s.docker.as_ref())
                .and_then(|d| d.manage)
                == Some(false);
            Ok(if unmanaged { CriType::NotManaged } else { CriType::Docker })
        }
        c if c.is_containerd() && version < CONTAINERD_MIN_VERSION => Err(UnsupportedCri { cri: c }),
        c => Ok(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DockerSpec;

    const V1_18: KubeVersion = KubeVersion::new(1, 18, 20);
    const V1_29: KubeVersion = KubeVersion::new(1, 29, 0);

    fn spec(cri_type: Option<CriType>) -> CriSpec {
        CriSpec {
            cri_type,
            ..CriSpec::default()
        }
    }

    #[test]
    fn test_builtin_defaults() {
        assert_eq!(resolve_cri(None, None, V1_29), Ok(CriType::Containerd));
        assert_eq!(resolve_cri(None, None, V1_18), Ok(CriType::Docker));
        assert_eq!(resolve_cri(Some(&spec(None)), None, V1_18), Ok(CriType::Docker));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            resolve_cri(Some(&spec(Some(CriType::ContainerdV2))), Some(CriType::Docker), V1_29),
            Ok(CriType::ContainerdV2)
        );
        assert_eq!(
            resolve_cri(Some(&spec(None)), Some(CriType::Docker), V1_29),
            Ok(CriType::Docker)
        );
    }

    #[test]
    fn test_unmanaged_docker() {
        let mut cri = spec(Some(CriType::Docker));
        cri.docker = Some(DockerSpec {
            manage: Some(false),
            ..DockerSpec::default()
        });
        assert_eq!(resolve_cri(Some(&cri), None, V1_29), Ok(CriType::NotManaged));

        cri.docker = Some(DockerSpec {
            manage: Some(true),
            ..DockerSpec::default()
        });
        assert_eq!(resolve_cri(Some(&cri), None, V1_29), Ok(CriType::Docker));
    }

    #[test]
    fn test_containerd_needs_1_19() {
        let err = resolve_cri(Some(&spec(Some(CriType::Containerd))), None, V1_18).unwrap_err();
        assert_eq!(err.to_string(), "cri type Containerd is allowed only for kubernetes 1.19+");

        let err = resolve_cri(None, Some(CriType::ContainerdV2), V1_18).unwrap_err();
        assert_eq!(err.cri, CriType::ContainerdV2);

        assert_eq!(
            resolve_cri(Some(&spec(Some(CriType::Containerd))), None, KubeVersion::new(1, 19, 0)),
            Ok(CriType::Containerd)
        );
    }
}
