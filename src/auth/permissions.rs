use anyhow::Error;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnProgress,
    SubmitOwnProgress,
    ViewOwnCertificates,

    CheckWorkerEligibility,
    ViewWorkerProgress,

    ActivateOrders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Worker,
    CompanyAdmin,
    Admin,
}

static WORKER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnProgress);
    permissions.insert(Permission::SubmitOwnProgress);
    permissions.insert(Permission::ViewOwnCertificates);

    permissions
});

static COMPANY_ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(WORKER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::CheckWorkerEligibility);
    permissions.insert(Permission::ViewWorkerProgress);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(COMPANY_ADMIN_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ActivateOrders);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Worker => &WORKER_PERMISSIONS,
            Role::CompanyAdmin => &COMPANY_ADMIN_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Worker => "worker",
            Role::CompanyAdmin => "company_admin",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "worker" => Ok(Role::Worker),
            "company_admin" => Ok(Role::CompanyAdmin),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
