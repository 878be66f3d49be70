//! SQL text for publication and subscription management.
//!
//! Identifiers are validated before they reach these builders, but they are
//! still quoted; literals are escaped.

use replwatch_state::{StateResult, validate_identifier};

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''"))
}

pub fn create_publication(name: &str, tables: Option<&[String]>) -> StateResult<String> {
    validate_identifier("publication", name)?;
    let target = match tables {
        Some(tables) if !tables.is_empty() => {
            let list: Vec<String> = tables.iter().map(|t| quote_qualified(t)).collect();
            format!("FOR TABLE {}", list.join(", "))
        }
        _ => "FOR ALL TABLES".to_string(),
    };
    Ok(format!("CREATE PUBLICATION {} {target}", quote_ident(name)))
}

pub fn drop_publication(name: &str) -> StateResult<String> {
    validate_identifier("publication", name)?;
    Ok(format!("DROP PUBLICATION IF EXISTS {}", quote_ident(name)))
}

pub fn create_subscription(
    name: &str,
    conninfo: &str,
    publication: &str,
    copy_data: bool,
) -> StateResult<String> {
    validate_identifier("subscription", name)?;
    validate_identifier("publication", publication)?;
    Ok(format!(
        "CREATE SUBSCRIPTION {} CONNECTION {} PUBLICATION {} WITH (copy_data = {copy_data})",
        quote_ident(name),
        quote_literal(conninfo),
        quote_ident(publication),
    ))
}

pub fn drop_subscription(name: &str) -> StateResult<String> {
    validate_identifier("subscription", name)?;
    Ok(format!("DROP SUBSCRIPTION IF EXISTS {}", quote_ident(name)))
}

/// `schema.table` → `"schema"."table"`.
fn quote_qualified(table: &str) -> String {
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publication_for_all_tables() {
        assert_eq!(
            create_publication("orders_pub", None).unwrap(),
            r#"CREATE PUBLICATION "orders_pub" FOR ALL TABLES"#
        );
    }

    #[test]
    fn publication_for_table_list() {
        let tables = vec!["public.orders".to_string(), "customers".to_string()];
        assert_eq!(
            create_publication("orders_pub", Some(&tables)).unwrap(),
            r#"CREATE PUBLICATION "orders_pub" FOR TABLE "public"."orders", "customers""#
        );
    }

    #[test]
    fn subscription_escapes_conninfo() {
        let sql = create_subscription("sub1", "host=a password=it's", "pub1", false).unwrap();
        assert_eq!(
            sql,
            r#"CREATE SUBSCRIPTION "sub1" CONNECTION 'host=a password=it''s' PUBLICATION "pub1" WITH (copy_data = false)"#
        );
    }

    #[test]
    fn drops_are_idempotent() {
        assert_eq!(
            drop_subscription("sub1").unwrap(),
            r#"DROP SUBSCRIPTION IF EXISTS "sub1""#
        );
        assert_eq!(
            drop_publication("pub1").unwrap(),
            r#"DROP PUBLICATION IF EXISTS "pub1""#
        );
    }

    #[test]
    fn invalid_identifiers_rejected() {
        assert!(create_publication("bad name", None).is_err());
        assert!(create_subscription("sub1", "host=a", "pub;drop", true).is_err());
    }
}
