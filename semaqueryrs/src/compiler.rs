//! End-to-end compilation: request → query spec → dataflow plan → SQL plan.

use crate::config::SemaqueryConfig;
use crate::dataflow::builder::DataflowPlanBuilder;
use crate::dataflow::node::DataflowPlan;
use crate::error::Result;
use crate::model::lookup::SemanticModelLookup;
use crate::naming::cache::DescriptorCache;
use crate::resolution::parser::{QueryParser, QueryRequest, QuerySpec};
use crate::specs::column_assoc::DunderColumnAssociationResolver;
use crate::sql::convert::{DataflowToSqlConverter, SqlGenerationOptions};
use crate::sql::dialect::Dialect;
use crate::sql::plan::SqlQueryPlan;
use crate::sql::render::SqlRenderer;

/// Every stage of a compiled query, kept for inspection.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub query_spec: QuerySpec,
    pub dataflow_plan: DataflowPlan,
    pub sql_plan: SqlQueryPlan,
}

impl CompiledQuery {
    pub fn render_sql(&self, dialect: &dyn Dialect) -> String {
        SqlRenderer::new(dialect).render_plan(&self.sql_plan)
    }
}

pub struct QueryCompiler<'a> {
    lookup: &'a dyn SemanticModelLookup,
    config: SemaqueryConfig,
    column_resolver: DunderColumnAssociationResolver,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(lookup: &'a dyn SemanticModelLookup, config: SemaqueryConfig) -> Self {
        Self {
            lookup,
            config,
            column_resolver: DunderColumnAssociationResolver,
        }
    }

    pub fn config(&self) -> &SemaqueryConfig {
        &self.config
    }

    pub fn compile(&self, request: &QueryRequest) -> Result<CompiledQuery> {
        self.compile_with_options(request, &SqlGenerationOptions::from_config(&self.config.sql))
    }

    pub fn compile_with_options(
        &self,
        request: &QueryRequest,
        options: &SqlGenerationOptions,
    ) -> Result<CompiledQuery> {
        let mut cache = DescriptorCache::with_config(&self.config.parser);
        let query_spec = QueryParser::new(self.lookup, &self.column_resolver, &self.config)
            .parse(request, &mut cache)?;
        let dataflow_plan = DataflowPlanBuilder::new(self.lookup, &self.column_resolver)
            .build_plan(&query_spec, &mut cache)?;
        let sql_plan = DataflowToSqlConverter::new(self.lookup, &self.column_resolver, &self.config.sql)
            .convert(&dataflow_plan, options)?;
        tracing::debug!(
            metrics = query_spec.metric_specs.len(),
            group_by = query_spec.group_by_specs.len(),
            ctes = sql_plan.ctes.len(),
            descriptor_cache_hits = cache.hits(),
            "compiled query"
        );
        Ok(CompiledQuery {
            query_spec,
            dataflow_plan,
            sql_plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SemaqueryError;
    use crate::model::lookup::ManifestLookup;
    use crate::model::manifest::SemanticManifest;
    use crate::sql::convert::CteSelection;
    use crate::sql::dialect::DuckDbDialect;

    const MANIFEST: &str = r#"
semantic_models:
  - name: bookings_source
    node_relation: fct_bookings
    defaults: {agg_time_dimension: ds}
    entities:
      - {name: booking, type: primary}
    dimensions:
      - {name: ds, type: time}
    measures:
      - {name: bookings, agg: sum, expr: "1"}
metrics:
  - name: bookings
    type: simple
    type_params: {measure: bookings}
"#;

    fn lookup() -> ManifestLookup {
        ManifestLookup::new(SemanticManifest::from_yaml(MANIFEST).unwrap(), 2)
    }

    #[test]
    fn compiles_to_sql() {
        let lookup = lookup();
        let compiler = QueryCompiler::new(&lookup, SemaqueryConfig::default());
        let compiled = compiler
            .compile(&QueryRequest::new(["bookings"]).group_by(["metric_time__day"]))
            .unwrap();
        let sql = compiled.render_sql(&DuckDbDialect);
        assert!(sql.starts_with("SELECT \"subq_4\".\"metric_time__day\" AS \"metric_time__day\""));
        assert!(sql.contains("FROM \"fct_bookings\" \"subq_0\""));
        assert!(compiled.sql_plan.ctes.is_empty());
    }

    #[test]
    fn invalid_queries_surface_as_errors() {
        let lookup = lookup();
        let compiler = QueryCompiler::new(&lookup, SemaqueryConfig::default());
        let err = compiler.compile(&QueryRequest::new(["bookingz"])).unwrap_err();
        assert!(matches!(err, SemaqueryError::InvalidQuery(_)));
    }

    #[test]
    fn options_override_config() {
        let lookup = lookup();
        let compiler = QueryCompiler::new(&lookup, SemaqueryConfig::default());
        let request = QueryRequest::new(["bookings"]);
        let plain = compiler
            .compile_with_options(&request, &SqlGenerationOptions::default())
            .unwrap();
        let with_ctes = compiler
            .compile_with_options(
                &request,
                &SqlGenerationOptions {
                    cte_selection: CteSelection::CommonBranches,
                },
            )
            .unwrap();
        assert_eq!(
            plain.render_sql(&DuckDbDialect),
            with_ctes.render_sql(&DuckDbDialect)
        );
    }
}
