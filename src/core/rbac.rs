//! Role/permission policy table.
//!
//! Built once at startup from [`PolicyConfig`](crate::core::config::PolicyConfig)
//! and shared read-only through `AppState`. Handlers ask it whether the
//! caller's role carries a permission; nothing mutates it after boot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::str::FromStr;

use crate::core::middleware::AuthenticatedUser;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Admin | Self::Teacher)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Teacher => write!(f, "teacher"),
            Self::Student => write!(f, "student"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewCourses,
    CreateCourses,
    EditCourses,
    DeleteCourses,
    PublishCourses,
    EnrollCourses,

    ViewLessons,
    CreateLessons,
    EditLessons,
    DeleteLessons,

    ViewQuizzes,
    CreateQuizzes,
    EditQuizzes,
    DeleteQuizzes,
    TakeQuizzes,

    ViewUsers,
    CreateUsers,
    EditUsers,
    DeleteUsers,

    ViewCategories,
    CreateCategories,
    EditCategories,
    DeleteCategories,

    ViewEnrollments,
    CreateEnrollments,
    DeleteEnrollments,

    ViewPayments,
    ProcessPayments,
    RefundPayments,

    ViewCertificates,
    GenerateCertificates,
    RevokeCertificates,
}

impl Permission {
    pub const ALL: [Permission; 32] = [
        Self::ViewCourses,
        Self::CreateCourses,
        Self::EditCourses,
        Self::DeleteCourses,
        Self::PublishCourses,
        Self::EnrollCourses,
        Self::ViewLessons,
        Self::CreateLessons,
        Self::EditLessons,
        Self::DeleteLessons,
        Self::ViewQuizzes,
        Self::CreateQuizzes,
        Self::EditQuizzes,
        Self::DeleteQuizzes,
        Self::TakeQuizzes,
        Self::ViewUsers,
        Self::CreateUsers,
        Self::EditUsers,
        Self::DeleteUsers,
        Self::ViewCategories,
        Self::CreateCategories,
        Self::EditCategories,
        Self::DeleteCategories,
        Self::ViewEnrollments,
        Self::CreateEnrollments,
        Self::DeleteEnrollments,
        Self::ViewPayments,
        Self::ProcessPayments,
        Self::RefundPayments,
        Self::ViewCertificates,
        Self::GenerateCertificates,
        Self::RevokeCertificates,
    ];
}

/// Grants shipped with the server; `policy.roles` in config replaces them per role.
pub fn default_role_grants() -> BTreeMap<Role, BTreeSet<Permission>> {
    use Permission::*;

    let teacher = [
        ViewCourses,
        CreateCourses,
        EditCourses,
        PublishCourses,
        ViewLessons,
        CreateLessons,
        EditLessons,
        DeleteLessons,
        ViewQuizzes,
        CreateQuizzes,
        EditQuizzes,
        DeleteQuizzes,
        ViewCategories,
        ViewEnrollments,
        ViewPayments,
        ViewCertificates,
        GenerateCertificates,
    ];
    let student = [
        ViewCourses,
        EnrollCourses,
        ViewLessons,
        ViewQuizzes,
        TakeQuizzes,
        ViewCertificates,
    ];

    let mut grants = BTreeMap::new();
    grants.insert(Role::Admin, Permission::ALL.into_iter().collect());
    grants.insert(Role::Teacher, teacher.into_iter().collect());
    grants.insert(Role::Student, student.into_iter().collect());
    grants
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("role {role} lacks permission {permission:?}")]
pub struct PermissionDenied {
    pub role: Role,
    pub permission: Permission,
}

#[derive(Debug, Clone)]
pub struct PolicyTable {
    grants: HashMap<Role, HashSet<Permission>>,
}

impl PolicyTable {
    pub fn from_grants(grants: &BTreeMap<Role, BTreeSet<Permission>>) -> Self {
        let grants = grants
            .iter()
            .map(|(role, perms)| (*role, perms.iter().copied().collect()))
            .collect();
        Self { grants }
    }

    pub fn is_allowed(&self, role: Role, permission: Permission) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|perms| perms.contains(&permission))
    }

    pub fn authorize(
        &self,
        user: &AuthenticatedUser,
        permission: Permission,
    ) -> Result<(), PermissionDenied> {
        if self.is_allowed(user.role, permission) {
            Ok(())
        } else {
            Err(PermissionDenied {
                role: user.role,
                permission,
            })
        }
    }

    pub fn permissions_for(&self, role: Role) -> Vec<Permission> {
        let mut perms: Vec<Permission> = self
            .grants
            .get(&role)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        perms.sort();
        perms
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::from_grants(&default_role_grants())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_has_every_permission() {
        let table = PolicyTable::default();
        for perm in Permission::ALL {
            assert!(table.is_allowed(Role::Admin, perm), "{perm:?}");
        }
    }

    #[test]
    fn test_student_grants() {
        let table = PolicyTable::default();
        assert!(table.is_allowed(Role::Student, Permission::TakeQuizzes));
        assert!(table.is_allowed(Role::Student, Permission::EnrollCourses));
        assert!(!table.is_allowed(Role::Student, Permission::CreateCourses));
        assert!(!table.is_allowed(Role::Student, Permission::RefundPayments));
        assert_eq!(table.permissions_for(Role::Student).len(), 6);
    }

    #[test]
    fn test_teacher_cannot_refund_or_delete_courses() {
        let table = PolicyTable::default();
        assert!(table.is_allowed(Role::Teacher, Permission::GenerateCertificates));
        assert!(!table.is_allowed(Role::Teacher, Permission::RefundPayments));
        assert!(!table.is_allowed(Role::Teacher, Permission::DeleteCourses));
        assert!(!table.is_allowed(Role::Teacher, Permission::TakeQuizzes));
    }

    #[test]
    fn test_authorize() {
        let table = PolicyTable::default();
        let student = AuthenticatedUser::new(3, Role::Student);
        assert!(table.authorize(&student, Permission::TakeQuizzes).is_ok());
        let denied = table
            .authorize(&student, Permission::ProcessPayments)
            .unwrap_err();
        assert_eq!(denied.role, Role::Student);
        assert_eq!(denied.permission, Permission::ProcessPayments);
    }

    #[test]
    fn test_custom_grants_replace_defaults() {
        let mut grants = BTreeMap::new();
        grants.insert(Role::Student, BTreeSet::from([Permission::ViewCourses]));
        let table = PolicyTable::from_grants(&grants);
        assert!(table.is_allowed(Role::Student, Permission::ViewCourses));
        assert!(!table.is_allowed(Role::Student, Permission::TakeQuizzes));
        assert!(!table.is_allowed(Role::Admin, Permission::ViewCourses));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Teacher".parse::<Role>(), Ok(Role::Teacher));
        assert_eq!(" student ".parse::<Role>(), Ok(Role::Student));
        assert!("guest".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
        assert!(Role::Teacher.is_staff());
        assert!(!Role::Student.is_staff());
    }
}
