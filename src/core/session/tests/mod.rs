mod turn_pipeline;
