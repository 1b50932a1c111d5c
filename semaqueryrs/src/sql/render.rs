use crate::sql::dialect::Dialect;
use crate::sql::plan::{
    SqlBinaryOperator, SqlExpr, SqlJoinType, SqlPlanNode, SqlQueryPlan, SqlSelectStatement, TableRef,
};

pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Render the plan as one statement, CTEs first in a WITH clause.
    pub fn render_plan(&self, plan: &SqlQueryPlan) -> String {
        let body = self.render_node(&plan.root);
        if plan.ctes.is_empty() {
            return body;
        }
        let ctes: Vec<String> = plan
            .ctes
            .iter()
            .map(|cte| {
                format!(
                    "{} AS ({})",
                    self.dialect.quote_ident(&cte.alias),
                    self.render_node(&cte.select)
                )
            })
            .collect();
        format!("WITH {} {body}", ctes.join(", "))
    }

    pub fn render_node(&self, node: &SqlPlanNode) -> String {
        match node {
            SqlPlanNode::Select(select) => self.render_select(select),
            SqlPlanNode::Table { name } => format!("SELECT * FROM {}", self.dialect.qualify_table(name)),
        }
    }

    pub fn render_select(&self, query: &SqlSelectStatement) -> String {
        let select_items: Vec<String> = query
            .select
            .iter()
            .map(|item| {
                let expr_sql = self.render_expr(&item.expr);
                match &item.alias {
                    Some(alias) => format!("{expr_sql} AS {}", self.dialect.quote_ident(alias)),
                    None => expr_sql,
                }
            })
            .collect();

        let mut sql = format!(
            "SELECT {} FROM {}",
            select_items.join(", "),
            self.render_table_ref(&query.from)
        );

        for join in &query.joins {
            let join_kw = match join.join_type {
                SqlJoinType::Left => "LEFT OUTER JOIN",
                SqlJoinType::FullOuter => "FULL OUTER JOIN",
                SqlJoinType::Cross => "CROSS JOIN",
            };
            sql.push_str(&format!(" {join_kw} {}", self.render_table_ref(&join.table)));
            if !join.on.is_empty() {
                let on_clause: Vec<String> = join.on.iter().map(|e| self.render_expr(e)).collect();
                sql.push_str(&format!(" ON {}", on_clause.join(" AND ")));
            }
        }

        if !query.filters.is_empty() {
            let filters: Vec<String> = query.filters.iter().map(|f| self.render_expr(f)).collect();
            sql.push_str(&format!(" WHERE {}", filters.join(" AND ")));
        }

        if !query.group_by.is_empty() {
            let groups: Vec<String> = query.group_by.iter().map(|g| self.render_expr(g)).collect();
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }

        if !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    let expr = self.render_expr(&o.expr);
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("{expr} {dir}")
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }

    fn render_table_ref(&self, table: &TableRef) -> String {
        let source = match &table.source {
            SqlPlanNode::Table { name } => self.dialect.qualify_table(name),
            SqlPlanNode::Select(select) => format!("({})", self.render_select(select)),
        };
        match &table.alias {
            Some(alias) => format!("{source} {}", self.dialect.quote_ident(alias)),
            None => source,
        }
    }

    pub fn render_expr(&self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    self.dialect.quote_ident(t),
                    self.dialect.quote_ident(name)
                ),
                None => self.dialect.quote_ident(name),
            },
            SqlExpr::Literal(v) => self.dialect.render_literal(v),
            SqlExpr::Raw(sql) => sql.clone(),
            SqlExpr::Function { func, args } => {
                let rendered_args: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
                self.dialect.render_function(*func, rendered_args)
            }
            SqlExpr::Cast { expr, data_type } => {
                format!("CAST({} AS {data_type})", self.render_expr(expr))
            }
            SqlExpr::BinaryOp { op, left, right } => {
                let op_sql = match op {
                    SqlBinaryOperator::Add => "+",
                    SqlBinaryOperator::Subtract => "-",
                    SqlBinaryOperator::Multiply => "*",
                    SqlBinaryOperator::Divide => "/",
                    SqlBinaryOperator::And => "AND",
                    SqlBinaryOperator::Eq => "=",
                };
                format!(
                    "({} {} {})",
                    self.render_expr(left),
                    op_sql,
                    self.render_expr(right)
                )
            }
            SqlExpr::Aggregate { agg, expr } => self
                .dialect
                .render_aggregation(*agg, &self.render_expr(expr)),
            SqlExpr::DateTrunc { granularity, expr } => self
                .dialect
                .render_date_trunc(*granularity, &self.render_expr(expr)),
            SqlExpr::Extract { date_part, expr } => self
                .dialect
                .render_extract(*date_part, &self.render_expr(expr)),
            SqlExpr::AddInterval { expr, window } => {
                let added = self.dialect.render_add_interval(&self.render_expr(expr), *window);
                format!("({added})")
            }
            SqlExpr::Window {
                func,
                expr,
                partition_by,
                order_by,
            } => {
                let mut over = Vec::new();
                if !partition_by.is_empty() {
                    let parts: Vec<String> = partition_by.iter().map(|e| self.render_expr(e)).collect();
                    over.push(format!("PARTITION BY {}", parts.join(", ")));
                }
                if !order_by.is_empty() {
                    let orders: Vec<String> = order_by.iter().map(|e| self.render_expr(e)).collect();
                    over.push(format!("ORDER BY {}", orders.join(", ")));
                    over.push("ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW".to_string());
                }
                format!(
                    "{} OVER ({})",
                    self.dialect.render_window_function(*func, &self.render_expr(expr)),
                    over.join(" ")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::elements::TimeGranularity;
    use crate::model::manifest::AggregationType;
    use crate::sql::dialect::DuckDbDialect;
    use crate::sql::plan::{Join, OrderItem, SelectItem, SqlCteNode};

    fn from_table(name: &str, alias: &str) -> TableRef {
        TableRef {
            source: SqlPlanNode::table(name),
            alias: Some(alias.to_string()),
        }
    }

    #[test]
    fn renders_select_with_clauses() {
        let mut select = SqlSelectStatement::new(from_table("fct_bookings", "subq_0"));
        select.select.push(SelectItem {
            expr: SqlExpr::DateTrunc {
                granularity: TimeGranularity::Day,
                expr: Box::new(SqlExpr::raw("ds")),
            },
            alias: Some("metric_time__day".to_string()),
        });
        select.select.push(SelectItem {
            expr: SqlExpr::Aggregate {
                agg: AggregationType::Sum,
                expr: Box::new(SqlExpr::raw("1")),
            },
            alias: Some("bookings".to_string()),
        });
        select.group_by.push(SqlExpr::DateTrunc {
            granularity: TimeGranularity::Day,
            expr: Box::new(SqlExpr::raw("ds")),
        });
        select.order_by.push(OrderItem {
            expr: SqlExpr::column("subq_0", "bookings"),
            descending: true,
        });
        select.limit = Some(3);

        let renderer = SqlRenderer::new(&DuckDbDialect);
        assert_eq!(
            renderer.render_select(&select),
            "SELECT DATE_TRUNC('day', ds) AS \"metric_time__day\", SUM(1) AS \"bookings\" \
             FROM \"fct_bookings\" \"subq_0\" GROUP BY DATE_TRUNC('day', ds) \
             ORDER BY \"subq_0\".\"bookings\" DESC LIMIT 3"
        );
    }

    #[test]
    fn cross_join_has_no_on_clause() {
        let mut select = SqlSelectStatement::new(from_table("a", "subq_0"));
        select.select.push(SelectItem {
            expr: SqlExpr::column("subq_0", "x"),
            alias: None,
        });
        select.joins.push(Join {
            join_type: SqlJoinType::Cross,
            table: from_table("b", "subq_1"),
            on: Vec::new(),
        });
        let sql = SqlRenderer::new(&DuckDbDialect).render_select(&select);
        assert!(sql.ends_with("CROSS JOIN \"b\" \"subq_1\""));
    }

    #[test]
    fn ctes_are_rendered_in_a_with_clause() {
        let mut inner = SqlSelectStatement::new(from_table("fct_bookings", "subq_0"));
        inner.select.push(SelectItem {
            expr: SqlExpr::raw("1"),
            alias: Some("bookings".to_string()),
        });
        let mut outer = SqlSelectStatement::new(from_table("cte_0", "subq_1"));
        outer.select.push(SelectItem {
            expr: SqlExpr::column("subq_1", "bookings"),
            alias: Some("bookings".to_string()),
        });
        let plan = SqlQueryPlan {
            ctes: vec![SqlCteNode {
                alias: "cte_0".to_string(),
                select: SqlPlanNode::Select(Box::new(inner)),
            }],
            root: SqlPlanNode::Select(Box::new(outer)),
        };
        assert_eq!(
            SqlRenderer::new(&DuckDbDialect).render_plan(&plan),
            "WITH \"cte_0\" AS (SELECT 1 AS \"bookings\" FROM \"fct_bookings\" \"subq_0\") \
             SELECT \"subq_1\".\"bookings\" AS \"bookings\" FROM \"cte_0\" \"subq_1\""
        );
    }
}
