//! Authorization checks applied by document operations.
//!
//! `acl: None` means the check is deactivated. An empty policy denies
//! everything.

use crate::acl::AccessPolicy;
use crate::error::{DocError, DocResult};
use crate::schema::Schema;
use docstore_codec::{path, Content};
use std::collections::BTreeSet;

fn deny(raise: bool, message: String) -> DocResult<bool> {
    if raise {
        Err(DocError::authorization(message))
    } else {
        Ok(false)
    }
}

/// Checks `action` on the whole collection (`content: None`) or on one
/// document.
///
/// With `raise` a denial is an [`DocError::Authorization`], otherwise
/// `Ok(false)`. A type without privilege key sets fails the document-level
/// check.
///
/// # Errors
///
/// Returns an authorization error when denied and `raise` is set.
pub fn check_acl(
    schema: &Schema,
    acl: Option<&dyn AccessPolicy>,
    action: &str,
    content: Option<&Content>,
    raise: bool,
) -> DocResult<bool> {
    let Some(acl) = acl else {
        return Ok(true);
    };
    if acl.is_empty() {
        return deny(raise, "authorization check failed: empty ACL".to_string());
    }
    match content {
        None => {
            if acl.check(&format!("{}/*", schema.name()), action) {
                Ok(true)
            } else {
                deny(
                    raise,
                    format!("{} authorization check failed: {action}-collection", schema.name()),
                )
            }
        }
        Some(content) => {
            let values = match schema.privilege_values(content) {
                Ok(values) => values,
                Err(e) if raise => return Err(e),
                Err(_) => return Ok(false),
            };
            if values.iter().any(|privilege| acl.check(privilege, action)) {
                Ok(true)
            } else {
                let sets: Vec<&str> = schema
                    .privilege_key_sets()?
                    .into_iter()
                    .map(|(name, _)| name)
                    .collect();
                deny(
                    raise,
                    format!(
                        "{} authorization check failed: {action}-[{}]",
                        schema.name(),
                        sets.join(",")
                    ),
                )
            }
        }
    }
}

/// Fields covered by the `<prefix>.<group>` grants the caller holds on a
/// document.
pub fn authorized_fields(
    schema: &Schema,
    acl: Option<&dyn AccessPolicy>,
    prefix: &str,
    content: &Content,
) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    for (group, group_fields) in schema.field_groups() {
        let action = format!("{prefix}.{group}");
        if matches!(check_acl(schema, acl, &action, Some(content), false), Ok(true)) {
            fields.extend(group_fields.iter().cloned());
        }
    }
    fields
}

/// Checks an update of `changed` fields on a document: full `write`, or
/// `write.<group>` grants whose fields together cover every changed field.
///
/// # Errors
///
/// Returns an authorization error when neither applies.
pub fn check_update_acl<'a, I>(
    schema: &Schema,
    acl: Option<&dyn AccessPolicy>,
    content: &Content,
    changed: I,
) -> DocResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    if check_acl(schema, acl, "write", Some(content), false)? {
        return Ok(());
    }
    if !schema.field_groups().is_empty() {
        let allowed = authorized_fields(schema, acl, "write", content);
        let mut changed = changed.into_iter().map(path::root).peekable();
        if changed.peek().is_some() && changed.all(|field| allowed.contains(field)) {
            return Ok(());
        }
    }
    Err(DocError::authorization(
        "no write authorization, or field groups don't cover every updated field",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Acl, AclItem};
    use crate::schema::FieldSpec;
    use docstore_codec::Value;

    fn schema() -> Schema {
        Schema::builder("Order")
            .field(FieldSpec::text("orderId"))
            .field(FieldSpec::text("x"))
            .field(FieldSpec::text("y"))
            .field(FieldSpec::text("z"))
            .key_fields(["orderId"])
            .field_group("g1", ["x", "y"])
            .build()
            .unwrap()
    }

    fn order() -> Content {
        let mut c = Content::new();
        c.insert("orderId".into(), Value::from("A1"));
        c
    }

    #[test]
    fn missing_acl_allows_everything() {
        assert!(check_acl(&schema(), None, "drop", None, true).unwrap());
    }

    #[test]
    fn empty_acl_denies() {
        let acl = Acl::default();
        assert!(matches!(
            check_acl(&schema(), Some(&acl), "read", None, true),
            Err(DocError::Authorization { .. })
        ));
        assert!(!check_acl(&schema(), Some(&acl), "read", None, false).unwrap());
    }

    #[test]
    fn collection_and_document_levels() {
        let acl = Acl::new(vec![AclItem::new("Order/key/A1", "read,write")]);
        assert!(!check_acl(&schema(), Some(&acl), "read", None, false).unwrap());
        assert!(check_acl(&schema(), Some(&acl), "read", Some(&order()), true).unwrap());
        assert!(check_acl(&schema(), Some(&acl), "delete", Some(&order()), true).is_err());

        let admin = Acl::new(vec![AclItem::new("Order/*", "*")]);
        assert!(check_acl(&schema(), Some(&admin), "drop", None, true).unwrap());
    }

    #[test]
    fn field_group_updates() {
        let acl = Acl::new(vec![AclItem::new("Order/*", "write.g1")]);
        let s = schema();
        check_update_acl(&s, Some(&acl), &order(), ["x"]).unwrap();
        check_update_acl(&s, Some(&acl), &order(), ["x", "y"]).unwrap();
        assert!(matches!(
            check_update_acl(&s, Some(&acl), &order(), ["x", "z"]),
            Err(DocError::Authorization { .. })
        ));

        let full = Acl::new(vec![AclItem::new("Order/*", "write")]);
        check_update_acl(&s, Some(&full), &order(), ["x", "z"]).unwrap();
    }

    #[test]
    fn authorized_fields_union() {
        let acl = Acl::new(vec![AclItem::new("Order/key/A1", "read.g1")]);
        let fields = authorized_fields(&schema(), Some(&acl), "read", &order());
        assert_eq!(fields.len(), 2);
        assert!(authorized_fields(&schema(), Some(&acl), "write", &order()).is_empty());
    }
}
