use crate::{PermissionBranch, PermissionLeaf};

/// Scans branch lists for one query.
///
/// Lists are scanned newest-first and the first decisive branch ends the scan.
/// A subtractive superuser branch is never decisive on its own: it revokes
/// every older superuser grant for the rest of the query, including in lists
/// scanned later.
#[derive(Debug)]
struct Resolver<'a> {
    leaf: &'a PermissionLeaf,
    check_superuser: bool,
    superuser_revoked: bool,
}

impl<'a> Resolver<'a> {
    fn new(leaf: &'a PermissionLeaf, check_superuser: bool) -> Self {
        Resolver {
            leaf,
            check_superuser,
            superuser_revoked: false,
        }
    }

    /// `Some(granted)` if a branch in `branches` decides the query.
    fn scan(&mut self, branches: &[PermissionBranch]) -> Option<bool> {
        let leaf_valid = self.leaf.is_valid();
        for branch in branches.iter().rev() {
            if branch.is_superuser() {
                if !self.check_superuser || self.superuser_revoked {
                    continue;
                }
                if branch.is_subtractive() {
                    self.superuser_revoked = true;
                    continue;
                }
                return Some(true);
            }
            if leaf_valid && branch.contains(self.leaf) {
                return Some(!branch.is_subtractive());
            }
        }
        None
    }
}

/// Resolves `leaf` against a user's direct branches, then each group's branches in order.
///
/// Priority and any other group metadata play no part: a decision reached in
/// `direct` is final, and otherwise the first group that decides wins.
pub fn resolve(
    leaf: &PermissionLeaf,
    direct: &[PermissionBranch],
    groups: &[&[PermissionBranch]],
    check_superuser: bool,
) -> bool {
    if !leaf.is_valid() && !check_superuser {
        return false;
    }
    let mut resolver = Resolver::new(leaf, check_superuser);
    if let Some(granted) = resolver.scan(direct) {
        return granted;
    }
    groups
        .iter()
        .find_map(|branches| resolver.scan(branches))
        .unwrap_or(false)
}
